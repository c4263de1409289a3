//! Resolución de alias y campos derivados sobre el índice plano.
//!
//! Los pares de alias permiten poblar una clave canónica desde un campo
//! con otro nombre cuando la canónica está ausente; un valor explícito
//! siempre gana sobre uno derivado de alias. Las reglas derivadas
//! (normalización de score, porcentaje de ganancia, edad) nunca fallan:
//! todo camino de error degrada a "campo ausente".

use chrono::{Datelike, Local, NaiveDate};
use serde_json::Value;

use crate::flatten::FlatIndex;

/// Pares `(origen, destino)` específicos del dominio Sumate: si el
/// destino no existe en el índice y el origen sí, se copia el valor.
pub const ALIAS_PAIRS: &[(&str, &str)] = &[
    // Cliente
    ("nombre", "cliente.nombre"),
    ("apellido", "cliente.apellido_paterno"),
    ("apellido_paterno", "cliente.apellido_paterno"),
    ("apellido_materno", "cliente.apellido_materno"),
    ("telefono", "cliente.telefono"),
    ("email", "cliente.email"),
    ("curp", "cliente.CURP"),
    ("rfc", "cliente.RFC"),
    ("fecha_nacimiento", "cliente.fecha_de_nacimiento"),
    // Solicitud y evaluación
    ("credito_solicitado", "solicitud.monto_solicitado"),
    ("plazo_solicitado", "solicitud.plazo_solicitado"),
    ("proposito_credito", "solicitud.proposito"),
    ("score_sumate", "evaluacion.score_sumate"),
    ("nivel_riesgo", "evaluacion.nivel_riesgo"),
    // Dirección
    ("calle", "direccion.calle"),
    ("numero", "direccion.numero"),
    ("colonia", "direccion.colonia"),
    ("codigo_postal", "direccion.codigo_postal"),
    ("municipio", "direccion.municipio"),
    ("estado", "direccion.estado"),
    // Trabajo
    ("empresa", "trabajo.empresa"),
    ("puesto", "trabajo.puesto"),
    ("salario", "trabajo.salario_mensual"),
    ("antiguedad", "trabajo.antiguedad_anos"),
    // Referencias
    ("referencia1_nombre", "referencias.referencia1.nombre"),
    ("referencia1_telefono", "referencias.referencia1.telefono"),
    ("referencia2_nombre", "referencias.referencia2.nombre"),
    ("referencia2_telefono", "referencias.referencia2.telefono"),
    // Expediente
    ("expediente", "numero_de_expediente"),
];

/// Aplica los pares de alias en orden de declaración y después las
/// reglas de campos derivados. Devuelve el índice aumentado.
pub fn resolve(mut index: FlatIndex) -> FlatIndex {
    for (from, to) in ALIAS_PAIRS {
        if !index.contains_key(*to) {
            if let Some(v) = index.get(*from).cloned() {
                index.insert((*to).to_string(), v);
            }
        }
    }

    derive_fields(&mut index, Local::now().date_naive());
    index
}

/// Reglas derivadas. Cada una fija como mucho una clave adicional y
/// degrada en silencio si sus precondiciones no se cumplen.
fn derive_fields(index: &mut FlatIndex, today: NaiveDate) {
    // Normalización del score de buró: quitar ceros a la izquierda.
    if !index.contains_key("calc_bcscore") {
        if let Some(score) = index.get("bc_score").map(value_text) {
            let trimmed = score.trim().trim_start_matches('0');
            let normalized = if trimmed.is_empty() { "0" } else { trimmed };
            index.insert("calc_bcscore".to_string(), Value::String(normalized.to_string()));
        }
    }

    // Porcentajes de ganancia por renglón de venta.
    for n in 1..=6 {
        let target = format!("porcentaje_de_ganancia_{n}");
        if index.contains_key(&target) {
            continue;
        }
        let denom = index.get(&format!("venta_{n}")).map(value_text);
        let numer = index.get(&format!("ingreso_de_ganancia_{n}")).map(value_text);
        if let (Some(denom), Some(numer)) = (denom, numer) {
            if let Some(pct) = derive_percentage(&denom, &numer) {
                index.insert(target, Value::String(pct));
            }
        }
    }

    // Edad a partir de la fecha de nacimiento, sólo si no viene explícita.
    if !index.contains_key("edad") {
        let birth = index
            .get("fecha_nacimiento")
            .or_else(|| index.get("cliente.fecha_de_nacimiento"))
            .map(value_text);
        if let Some(birth) = birth {
            if let Some(age) = age_from_date_str(&birth, today) {
                index.insert("edad".to_string(), Value::from(age));
            }
        }
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `round(numerador/denominador * 100, 2)`, con denominador > 0 y
/// numerador ≥ 0. Un resultado estrictamente entre 0 y 1 se eleva a 1.
/// Formato `"<n>%"` sin ceros de relleno.
pub fn derive_percentage(denominator: &str, numerator: &str) -> Option<String> {
    let denom = parse_smart_number(denominator)?;
    let numer = parse_smart_number(numerator)?;
    if denom <= 0.0 || numer < 0.0 {
        return None;
    }

    let mut pct = (numer / denom * 100.0 * 100.0).round() / 100.0;
    if pct > 0.0 && pct < 1.0 {
        pct = 1.0;
    }

    Some(format!("{}%", format_number(pct)))
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        let s = format!("{n:.2}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Parseo numérico tolerante: quita símbolo de moneda, separadores de
/// miles y espacios; un sufijo `mil` multiplica por 1000. Devuelve
/// `None` en lugar de fallar.
pub fn parse_smart_number(raw: &str) -> Option<f64> {
    let mut s: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();

    let mut factor = 1.0;
    if let Some(stripped) = s.strip_suffix("mil") {
        factor = 1000.0;
        s = stripped.to_string();
    }

    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().map(|n| n * factor)
}

/// Edad en años cumplidos a la fecha `today`. Acepta `YYYY-MM-DD` y
/// `DD-MM-YYYY` con separadores `-`, `.` o `/`. Fechas malformadas
/// devuelven `None` sin error.
pub fn age_from_date_str(date_str: &str, today: NaiveDate) -> Option<i32> {
    let cleaned = date_str.trim().replace(['.', '/'], "-");
    let parts: Vec<&str> = cleaned.split('-').collect();
    if parts.len() != 3 {
        return None;
    }

    let (yyyy, mm, dd) = if parts[0].len() == 4 {
        (parts[0], parts[1], parts[2])
    } else {
        (parts[2], parts[1], parts[0])
    };

    let birth = NaiveDate::from_ymd_opt(
        yyyy.parse().ok()?,
        mm.parse().ok()?,
        dd.parse().ok()?,
    )?;

    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    (age >= 0).then_some(age)
}
