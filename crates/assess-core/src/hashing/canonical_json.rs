//! Canonical JSON minimal: claves de objeto ordenadas, sin whitespace.
//!
//! Dos árboles estructuralmente iguales producen bytes idénticos sea cual sea
//! el orden de inserción de sus claves; de eso depende la detección de
//! no-cambios en las secciones.

use serde_json::Value;

pub fn to_canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        // to_string sobre &str nunca falla.
        Value::String(s) => out.push_str(&serde_json::to_string(s).unwrap()),
        Value::Array(arr) => {
            out.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(k, _)| *k);
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted() {
        let a = json!({"b": 1, "a": 2});
        assert_eq!(to_canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn arrays_preserve_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(to_canonical_json(&v), "[3,1,2]");
    }

    #[test]
    fn nested_structures_canonicalize_recursively() {
        let v = json!({"z": [{"b": true, "a": null}], "a": "texto"});
        assert_eq!(to_canonical_json(&v), r#"{"a":"texto","z":[{"a":null,"b":true}]}"#);
    }
}
