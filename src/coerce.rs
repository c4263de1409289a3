//! Coerción de valores crudos a la representación que espera la celda
//! destino: las cadenas numéricas se vuelven números (entero si no hay
//! parte fraccionaria), se eliminan símbolos de moneda y separadores de
//! miles, y ausente/vacío colapsa a `Empty`.

use serde_json::Value;

/// Valor ya coercido, listo para escribirse en una posición de plantilla.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Ausente o vacío: aguas abajo significa "vaciar la posición".
    Empty,
    Integer(i64),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(t) => t.trim().is_empty(),
            _ => false,
        }
    }

    /// Representación textual (para documentos Word y logs).
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(t) => t.clone(),
        }
    }
}

/// Convierte un valor crudo extraído del índice plano. Función total:
/// nunca falla, lo no numérico se conserva como texto tal cual.
pub fn coerce(raw: Option<&Value>) -> CellValue {
    let Some(value) = raw else {
        return CellValue::Empty;
    };

    match value {
        Value::Null => CellValue::Empty,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Integer(i)
            } else {
                CellValue::Number(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::Bool(b) => CellValue::Text(b.to_string()),
        Value::String(s) => coerce_str(s),
        other => CellValue::Text(other.to_string()),
    }
}

fn coerce_str(s: &str) -> CellValue {
    if s.is_empty() {
        return CellValue::Empty;
    }

    // Quitar símbolo de moneda, comas y espacios antes de intentar parsear.
    let clean: String = s
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    if !clean.is_empty() {
        if let Ok(n) = clean.parse::<f64>() {
            if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                return CellValue::Integer(n as i64);
            }
            return CellValue::Number(n);
        }
    }

    CellValue::Text(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thousands_separators_are_stripped() {
        assert_eq!(coerce(Some(&json!("1,234.00"))), CellValue::Integer(1234));
    }

    #[test]
    fn currency_symbol_is_stripped() {
        assert_eq!(coerce(Some(&json!("$500"))), CellValue::Integer(500));
    }

    #[test]
    fn empty_and_null_collapse_to_empty() {
        assert_eq!(coerce(Some(&json!(""))), CellValue::Empty);
        assert_eq!(coerce(Some(&serde_json::Value::Null)), CellValue::Empty);
        assert_eq!(coerce(None), CellValue::Empty);
    }

    #[test]
    fn non_numeric_strings_pass_through() {
        assert_eq!(coerce(Some(&json!("N/A"))), CellValue::Text("N/A".into()));
    }

    #[test]
    fn fractional_values_stay_floating() {
        assert_eq!(coerce(Some(&json!("12.5"))), CellValue::Number(12.5));
        assert_eq!(coerce(Some(&json!("$1,250.75"))), CellValue::Number(1250.75));
    }

    #[test]
    fn json_numbers_pass_through_unchanged() {
        assert_eq!(coerce(Some(&json!(42))), CellValue::Integer(42));
        assert_eq!(coerce(Some(&json!(3.25))), CellValue::Number(3.25));
    }

    #[test]
    fn booleans_stringify() {
        assert_eq!(coerce(Some(&json!(true))), CellValue::Text("true".into()));
    }
}
