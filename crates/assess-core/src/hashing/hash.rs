//! Hash helpers – el hash es detección de cambios, no integridad
//! criptográfica: los digests persistidos deben seguir siendo comparables,
//! así que el algoritmo es parte del contrato de datos.

use md5::{Digest, Md5};
use serde_json::Value;

use super::to_canonical_json;

/// Hashea un string y devuelve hex en minúsculas.
pub fn hash_str(input: &str) -> String {
    let mut h = Md5::new();
    h.update(input.as_bytes());
    format!("{:x}", h.finalize())
}

/// Digest del contenido de una sección o de un outline.
///
/// Strings se hashean tal cual (sin canonicalizar ni quotear); cualquier otro
/// valor pasa primero por la forma canónica.
pub fn content_hash(value: &Value) -> String {
    match value {
        Value::String(s) => hash_str(s),
        other => hash_str(&to_canonical_json(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_digest() {
        let a = json!({"x": 1, "y": [true, null]});
        let b = json!({"y": [true, null], "x": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn strings_hash_raw_bytes() {
        // md5("hola"), sin las comillas de la forma JSON
        assert_eq!(hash_str("hola"), content_hash(&json!("hola")));
        assert_ne!(content_hash(&json!("hola")), hash_str("\"hola\""));
    }
}
