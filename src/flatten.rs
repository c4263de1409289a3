//! Aplanado de registros anidados a un índice de rutas con puntos.
//!
//! El índice plano (`FlatIndex`) es la única superficie de búsqueda que
//! usa la resolución de mapeos: `{"cliente": {"nombre": "Ana"}}` se
//! convierte en `{"cliente.nombre": "Ana"}` y los arrays se indexan
//! numéricamente (`referencias.0.telefono`).

use std::collections::BTreeMap;

use serde_json::Value;

/// Índice plano: ruta con puntos → valor escalar.
pub type FlatIndex = BTreeMap<String, Value>;

/// Aplana un valor JSON arbitrariamente anidado.
///
/// Función pura sobre su argumento; los objetos vacíos no emiten
/// ninguna clave. Al ser `serde_json::Value` un árbol, los ciclos son
/// imposibles por construcción.
pub fn flatten(value: &Value) -> FlatIndex {
    let mut index = FlatIndex::new();
    flatten_into(value, "", &mut index);
    index
}

fn flatten_into(value: &Value, parent: &str, index: &mut FlatIndex) {
    let Value::Object(map) = value else {
        return;
    };

    for (key, val) in map {
        let path = compose(parent, key);
        match val {
            Value::Object(_) => flatten_into(val, &path, index),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}.{i}");
                    if item.is_object() {
                        flatten_into(item, &item_path, index);
                    } else {
                        index.insert(item_path, item.clone());
                    }
                }
            }
            _ => {
                index.insert(path, val.clone());
            }
        }
    }
}

fn compose(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Extrae un valor por ruta, con cadena de respaldo.
///
/// Orden de búsqueda: ruta exacta en el índice plano, ruta con los
/// puntos reemplazados por guiones bajos, coincidencia sin distinguir
/// mayúsculas, y por último navegación anidada sobre el registro
/// original. El primer acierto gana.
pub fn extract_path(index: &FlatIndex, original: &Value, path: &str) -> Option<Value> {
    if let Some(v) = index.get(path) {
        return Some(v.clone());
    }

    let underscored = path.replace('.', "_");
    if let Some(v) = index.get(&underscored) {
        return Some(v.clone());
    }

    let lowered = path.to_lowercase();
    for (key, v) in index {
        if key.to_lowercase() == lowered {
            return Some(v.clone());
        }
    }

    navigate(original, path)
}

/// Navegación anidada tradicional: `a.b.0.c` sobre el árbol original.
fn navigate(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_at_depth_one_are_identity() {
        let record = json!({"nombre": "Ana", "edad": 33, "activo": true});
        let index = flatten(&record);

        assert_eq!(index.len(), 3);
        assert_eq!(index["nombre"], json!("Ana"));
        assert_eq!(index["edad"], json!(33));
        assert_eq!(index["activo"], json!(true));
    }

    #[test]
    fn nested_objects_compose_dotted_paths() {
        let record = json!({"a": {"b": {"c": 5}}});
        let index = flatten(&record);

        assert_eq!(index.len(), 1);
        assert_eq!(index["a.b.c"], json!(5));
    }

    #[test]
    fn arrays_are_indexed_numerically() {
        let record = json!({"items": [{"x": 1}, {"x": 2}]});
        let index = flatten(&record);

        assert_eq!(index["items.0.x"], json!(1));
        assert_eq!(index["items.1.x"], json!(2));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn scalar_array_elements_assign_directly() {
        let record = json!({"telefonos": ["555-1", "555-2"]});
        let index = flatten(&record);

        assert_eq!(index["telefonos.0"], json!("555-1"));
        assert_eq!(index["telefonos.1"], json!("555-2"));
    }

    #[test]
    fn empty_objects_emit_no_keys() {
        let record = json!({"vacio": {}, "x": 1});
        let index = flatten(&record);

        assert_eq!(index.len(), 1);
        assert!(!index.contains_key("vacio"));
    }

    #[test]
    fn non_object_input_yields_empty_index() {
        assert!(flatten(&json!("hola")).is_empty());
        assert!(flatten(&json!(42)).is_empty());
        assert!(flatten(&Value::Null).is_empty());
    }

    #[test]
    fn extract_prefers_exact_path() {
        let record = json!({"cliente": {"nombre": "Ana"}, "cliente_nombre": "otro"});
        let index = flatten(&record);

        assert_eq!(extract_path(&index, &record, "cliente.nombre"), Some(json!("Ana")));
    }

    #[test]
    fn extract_falls_back_to_underscores() {
        let record = json!({"cliente_nombre": "Ana"});
        let index = flatten(&record);

        assert_eq!(extract_path(&index, &record, "cliente.nombre"), Some(json!("Ana")));
    }

    #[test]
    fn extract_falls_back_to_case_insensitive() {
        let record = json!({"cliente": {"CURP": "ABC123"}});
        let index = flatten(&record);

        assert_eq!(extract_path(&index, &record, "cliente.curp"), Some(json!("ABC123")));
    }

    #[test]
    fn extract_navigates_original_as_last_resort() {
        let record = json!({"refs": [{"tel": "555"}]});
        // Índice plano deliberadamente vacío para forzar la navegación.
        let index = FlatIndex::new();

        assert_eq!(extract_path(&index, &record, "refs.0.tel"), Some(json!("555")));
        assert_eq!(extract_path(&index, &record, "refs.9.tel"), None);
    }
}
