//! 工具参数 Schema → 表单字段
//!
//! 把工具的参数 JSON Schema（object 型：properties / required）翻译成
//! PendingConfig 的表单字段，并计算一次调用里缺失的必填参数。用于
//! param_required / authorization 两类挂起场景的表单渲染。

use serde_json::Value;

use crate::core::state::ConfigField;

/// 将 JSON Schema 的 type 映射为表单字段类型
fn field_type_of(prop: &Value) -> String {
    match prop.get("type").and_then(Value::as_str) {
        Some("boolean") => "switch".to_string(),
        Some("integer") | Some("number") => "number".to_string(),
        Some("array") => "array".to_string(),
        Some("object") => "object".to_string(),
        _ => "text".to_string(),
    }
}

/// 从工具参数 Schema 生成全部表单字段
pub fn fields_from_schema(schema: &Value) -> Vec<ConfigField> {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut fields: Vec<ConfigField> = props
        .iter()
        .map(|(name, prop)| {
            let description = prop
                .get("description")
                .and_then(Value::as_str)
                .map(String::from);
            ConfigField {
                name: name.clone(),
                label: description.clone().unwrap_or_else(|| name.clone()),
                field_type: field_type_of(prop),
                required: required.contains(&name.as_str()),
                default: prop.get("default").cloned(),
                options: prop
                    .get("enum")
                    .and_then(Value::as_array)
                    .map(|opts| opts.to_vec()),
                placeholder: Some(format!(
                    "请输入{}",
                    description.as_deref().unwrap_or(name)
                )),
                description,
            }
        })
        .collect();
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    fields
}

/// 检查一次调用缺失的必填参数，返回对应表单字段
pub fn check_missing_params(schema: &Value, provided_args: &Value) -> Vec<ConfigField> {
    let provided = provided_args.as_object();

    fields_from_schema(schema)
        .into_iter()
        .filter(|field| {
            field.required
                && provided
                    .map(|p| !p.contains_key(&field.name) || p[&field.name].is_null())
                    .unwrap_or(true)
        })
        .collect()
}
