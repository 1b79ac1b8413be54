//! 能力注册表
//!
//! 启动时构建一次、之后只读的命令目录：按四个固定类别分组，每条命令带描述与参数类型提示。
//! 对外序列化为 `{category: {command: {description, params: {name: typeHint}}}}`。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::envelope::Params;

/// 命令类别；窗口类为资源定向类别，分发前需刷新短 ID 表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    WindowCommands,
    MouseCommands,
    KeyboardCommands,
    SystemCommands,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::WindowCommands,
        Category::MouseCommands,
        Category::KeyboardCommands,
        Category::SystemCommands,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Category::WindowCommands => "window_commands",
            Category::MouseCommands => "mouse_commands",
            Category::KeyboardCommands => "keyboard_commands",
            Category::SystemCommands => "system_commands",
        }
    }

    pub fn is_resource_targeted(self) -> bool {
        matches!(self, Category::WindowCommands)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
}

impl ParamKind {
    pub fn hint(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub category: Category,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    /// 承载资源 ID 的参数名（如 window_id）
    pub target: Option<&'static str>,
}

impl CommandSpec {
    pub fn new(name: &'static str, category: Category, description: &'static str) -> Self {
        Self {
            name,
            category,
            description,
            params: Vec::new(),
            target: None,
        }
    }

    pub fn required(mut self, name: &'static str, kind: ParamKind) -> Self {
        self.params.push(ParamSpec { name, kind, required: true });
        self
    }

    pub fn optional(mut self, name: &'static str, kind: ParamKind) -> Self {
        self.params.push(ParamSpec { name, kind, required: false });
        self
    }

    /// 声明资源定向参数（必填字符串）
    pub fn targets(mut self, name: &'static str) -> Self {
        self.params.insert(0, ParamSpec { name, kind: ParamKind::String, required: true });
        self.target = Some(name);
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// 参数校验：必填项存在、值为标量、已声明参数的类型匹配；未声明的额外参数原样放行
    pub fn validate(&self, params: &Params) -> Result<(), String> {
        for spec in &self.params {
            match params.get(spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(format!(
                        "Missing required parameter '{}' for {}",
                        spec.name, self.name
                    ))
                }
                Some(v) if !v.is_null() && !spec.kind.accepts(v) => {
                    return Err(format!(
                        "Parameter '{}' for {} must be a {}",
                        spec.name,
                        self.name,
                        spec.kind.hint()
                    ))
                }
                _ => {}
            }
        }
        for (name, value) in params {
            if value.is_array() || value.is_object() {
                return Err(format!("Parameter '{}' must be a string, number or boolean", name));
            }
        }
        Ok(())
    }
}

/// 对外目录条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub description: String,
    pub params: BTreeMap<String, String>,
}

/// `{category: {command: entry}}`
pub type Catalogue = BTreeMap<String, BTreeMap<String, CatalogueEntry>>;

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    commands: BTreeMap<&'static str, CommandSpec>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名命令后注册者覆盖先注册者（只在启动期构建时调用）
    pub fn register(&mut self, spec: CommandSpec) {
        self.commands.insert(spec.name, spec);
    }

    pub fn lookup(&self, command: &str) -> Option<&CommandSpec> {
        self.commands.get(command)
    }

    pub fn contains(&self, command: &str) -> bool {
        self.commands.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values().filter(move |c| c.category == category)
    }

    pub fn catalogue(&self) -> Catalogue {
        Category::ALL
            .into_iter()
            .map(|category| {
                let group = self
                    .in_category(category)
                    .map(|spec| {
                        let entry = CatalogueEntry {
                            description: spec.description.to_string(),
                            params: spec
                                .params
                                .iter()
                                .map(|p| (p.name.to_string(), p.kind.hint().to_string()))
                                .collect(),
                        };
                        (spec.name.to_string(), entry)
                    })
                    .collect::<BTreeMap<_, _>>();
                (category.key().to_string(), group)
            })
            .collect()
    }

    /// 桌面自动化的标准命令集
    pub fn desktop() -> Self {
        use Category::{KeyboardCommands as K, MouseCommands as M, SystemCommands as S, WindowCommands as W};
        use ParamKind::{Boolean, Number, String as Str};

        let mut r = Self::new();
        r.register(CommandSpec::new("maximize", W, "Maximize window").targets("window_id"));
        r.register(CommandSpec::new("minimize", W, "Minimize window").targets("window_id"));
        r.register(CommandSpec::new("close", W, "Close window").targets("window_id"));
        r.register(
            CommandSpec::new("resize", W, "Resize window")
                .targets("window_id")
                .required("width", Number)
                .required("height", Number),
        );
        r.register(
            CommandSpec::new("move", W, "Move window")
                .targets("window_id")
                .required("x", Number)
                .required("y", Number),
        );
        r.register(
            CommandSpec::new("screen", W, "Move to screen position")
                .targets("window_id")
                .required("screen", Number)
                .required("x", Number)
                .required("y", Number),
        );
        r.register(
            CommandSpec::new("monitor", W, "Move to monitor")
                .targets("window_id")
                .required("monitor", Number),
        );
        r.register(CommandSpec::new("introspect", W, "Deep window introspection").targets("window_id"));
        r.register(CommandSpec::new("tree", W, "Show UI hierarchy tree").targets("window_id"));
        r.register(CommandSpec::new("get_windows", W, "Get all windows").optional("show_minimized", Boolean));
        r.register(CommandSpec::new("print_windows_summary", W, "Print summary of all windows"));
        r.register(CommandSpec::new("refresh_windows", W, "Refresh window list"));

        for (name, description) in [("click", "Mouse click"), ("doubleclick", "Double click")] {
            r.register(
                CommandSpec::new(name, M, description)
                    .optional("button", Str)
                    .optional("x", Number)
                    .optional("y", Number),
            );
        }
        r.register(
            CommandSpec::new("longclick", M, "Long click")
                .optional("button", Str)
                .optional("duration", Number)
                .optional("x", Number)
                .optional("y", Number),
        );
        r.register(
            CommandSpec::new("scroll", M, "Scroll")
                .required("direction", Str)
                .optional("amount", Number)
                .optional("x", Number)
                .optional("y", Number),
        );
        r.register(
            CommandSpec::new("drag", M, "Drag")
                .required("start_x", Number)
                .required("start_y", Number)
                .required("end_x", Number)
                .required("end_y", Number)
                .optional("button", Str)
                .optional("duration", Number),
        );

        r.register(CommandSpec::new("send", K, "Send key combination").required("keys", Str));
        r.register(CommandSpec::new("type", K, "Type text").required("text", Str));

        r.register(
            CommandSpec::new("launch", S, "Launch application")
                .required("app_name", Str)
                .optional("screen_id", Number)
                .optional("fullscreen", Boolean),
        );
        r.register(
            CommandSpec::new("msgbox", S, "Show message box")
                .required("title", Str)
                .required("message", Str)
                .optional("x", Number)
                .optional("y", Number),
        );
        r.register(CommandSpec::new("computer", S, "Get computer name"));
        r.register(CommandSpec::new("user", S, "Get user name"));
        r.register(CommandSpec::new("keys", S, "Show virtual key codes"));
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Params {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_desktop_catalogue_shape() {
        let registry = CapabilityRegistry::desktop();
        let catalogue = registry.catalogue();
        assert_eq!(catalogue.len(), 4);
        let resize = &catalogue["window_commands"]["resize"];
        assert_eq!(resize.description, "Resize window");
        assert_eq!(resize.params["window_id"], "string");
        assert_eq!(resize.params["width"], "number");
        assert!(catalogue["system_commands"]["computer"].params.is_empty());
        assert_eq!(catalogue["keyboard_commands"].len(), 2);
    }

    #[test]
    fn test_catalogue_serializes_as_nested_maps() {
        let json = serde_json::to_value(CapabilityRegistry::desktop().catalogue()).unwrap();
        assert_eq!(json["mouse_commands"]["click"]["params"]["button"], "string");
        assert_eq!(json["window_commands"]["get_windows"]["params"]["show_minimized"], "boolean");
    }

    #[test]
    fn test_targets_marks_resource_param() {
        let registry = CapabilityRegistry::desktop();
        assert_eq!(registry.lookup("close").unwrap().target, Some("window_id"));
        assert_eq!(registry.lookup("get_windows").unwrap().target, None);
        assert!(registry.lookup("fly").is_none());
    }

    #[test]
    fn test_validate_required_and_types() {
        let registry = CapabilityRegistry::desktop();
        let resize = registry.lookup("resize").unwrap();
        assert!(resize
            .validate(&params(json!({"window_id": "abc", "width": 800, "height": 600})))
            .is_ok());
        let missing = resize.validate(&params(json!({"window_id": "abc", "width": 800})));
        assert!(missing.unwrap_err().contains("height"));
        let mistyped = resize.validate(&params(json!({"window_id": "abc", "width": "wide", "height": 1})));
        assert!(mistyped.unwrap_err().contains("number"));
    }

    #[test]
    fn test_validate_rejects_nested_values() {
        let registry = CapabilityRegistry::desktop();
        let click = registry.lookup("click").unwrap();
        assert!(click.validate(&params(json!({"extra": [1, 2]}))).is_err());
        assert!(click.validate(&params(json!({"extra": "ok"}))).is_ok());
    }
}
