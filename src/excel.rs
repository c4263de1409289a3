//! Relleno de plantillas Excel.
//!
//! Pipeline sobre la plantilla descargada: limpiar los marcadores de
//! relleno rojo, redirigir cada posición destino a la celda maestra de
//! su región combinada, escribir los valores coercidos (o vaciar la
//! celda cuando no hay dato) y aplicar la regla posterior del formato.

use std::io::Cursor;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use umya_spreadsheet::{reader, writer, PatternValues, Style, Worksheet};

use crate::alias;
use crate::coerce::{coerce, CellValue};
use crate::error::{DocumentError, Result};
use crate::flatten::{extract_path, flatten};
use crate::mapping::MappingRow;

/// Color de relleno que marca las posiciones editables de la plantilla.
pub const MARKER_ARGB: &str = "FFFF0000";

/// Regla aplicada tras el relleno, según el formato del documento.
#[derive(Debug, Clone, PartialEq)]
pub enum PostRule {
    None,
    /// Vaciar posiciones concretas (se redirigen a su celda maestra).
    ClearCells(&'static [&'static str]),
    /// Proteger la hoja con una contraseña derivada de la frase secreta.
    Protect,
}

/// Región combinada ya parseada a coordenadas numéricas.
struct MergedRange {
    col_start: u32,
    row_start: u32,
    col_end: u32,
    row_end: u32,
}

impl MergedRange {
    fn contains(&self, col: u32, row: u32) -> bool {
        col >= self.col_start && col <= self.col_end && row >= self.row_start && row <= self.row_end
    }

    fn master(&self) -> String {
        compose_addr(self.col_start, self.row_start)
    }
}

/// Rellena la plantilla y devuelve el `.xlsx` serializado.
pub fn render(
    template: &[u8],
    sheet_name: &str,
    mappings: &[MappingRow],
    record: &Value,
    post_rule: &PostRule,
    secret_phrase: Option<&str>,
) -> Result<Vec<u8>> {
    let mut book = reader::xlsx::read_reader(Cursor::new(template), true)
        .map_err(|e| DocumentError::Render(format!("plantilla xlsx ilegible: {e}")))?;

    let sheet = book
        .get_sheet_by_name_mut(sheet_name)
        .ok_or_else(|| DocumentError::Render(format!("hoja \"{sheet_name}\" no encontrada en la plantilla")))?;

    let merged = collect_merged_ranges(sheet);
    let cleared = clear_marker_fills(sheet);
    info!("Limpiados {} rellenos de marcador de la plantilla", cleared);

    let index = alias::resolve(flatten(record));

    let mut set_count = 0usize;
    let mut nulled = 0usize;
    for row in mappings {
        let Some((col, row_num)) = parse_addr(&row.cell) else {
            warn!("Posición inválida en tabla de mapeo: {}", row.cell);
            continue;
        };
        let addr = master_addr(&merged, col, row_num);

        let raw = extract_path(&index, record, &row.placeholder);
        let value = coerce(raw.as_ref());

        if value.is_empty() {
            // Sin dato: la posición queda vacía, nunca con el marcador.
            sheet.get_cell_mut(addr.as_str()).set_value_string("");
            nulled += 1;
        } else {
            write_value(sheet, &addr, &value);
            clear_fill(sheet.get_style_mut(addr.as_str()));
            debug!("{}: escrito {} ({})", addr, value.to_text(), row.placeholder);
            set_count += 1;
        }
    }
    info!("Celdas escritas: {}, vaciadas: {}", set_count, nulled);

    apply_post_rule(sheet, &merged, post_rule, secret_phrase)?;

    let mut out = Cursor::new(Vec::new());
    writer::xlsx::write_writer(&book, &mut out)
        .map_err(|e| DocumentError::Render(format!("serializando xlsx: {e}")))?;
    Ok(out.into_inner())
}

fn apply_post_rule(
    sheet: &mut Worksheet,
    merged: &[MergedRange],
    post_rule: &PostRule,
    secret_phrase: Option<&str>,
) -> Result<()> {
    match post_rule {
        PostRule::None => {}
        PostRule::ClearCells(addrs) => {
            for raw_addr in *addrs {
                if let Some((col, row)) = parse_addr(raw_addr) {
                    let addr = master_addr(merged, col, row);
                    sheet.get_cell_mut(addr.as_str()).set_value_string("");
                }
            }
        }
        PostRule::Protect => {
            let phrase = secret_phrase.ok_or_else(|| {
                DocumentError::Configuration("FRASE_SECRETA_EXCEL no está configurada".to_string())
            })?;
            let password = dynamic_password(phrase);
            let protection = sheet.get_sheet_protection_mut();
            protection.set_password(&password);
            protection.set_sheet(true);
            info!("Protección de hoja aplicada");
        }
    }
    Ok(())
}

/// Contraseña derivada: los primeros 15 hex de
/// `sha256(frase + milisegundos_actuales)`. No se persiste; el
/// documento protegido queda de sólo lectura efectiva.
fn dynamic_password(secret_phrase: &str) -> String {
    let timestamp = Utc::now().timestamp_millis().to_string();
    let mut hasher = Sha256::new();
    hasher.update(secret_phrase.as_bytes());
    hasher.update(timestamp.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..15].to_string()
}

fn write_value(sheet: &mut Worksheet, addr: &str, value: &CellValue) {
    let cell = sheet.get_cell_mut(addr);
    match value {
        CellValue::Integer(i) => {
            cell.set_value_number(*i as f64);
        }
        CellValue::Number(n) => {
            cell.set_value_number(*n);
        }
        CellValue::Text(t) => {
            cell.set_value_string(t.as_str());
        }
        CellValue::Empty => {
            cell.set_value_string("");
        }
    }
}

fn collect_merged_ranges(sheet: &Worksheet) -> Vec<MergedRange> {
    sheet
        .get_merge_cells()
        .iter()
        .filter_map(|range| parse_range(&range.get_range()))
        .collect()
}

/// Si la posición cae dentro de una región combinada, devuelve la
/// dirección de la celda superior izquierda; si no, la propia.
fn master_addr(merged: &[MergedRange], col: u32, row: u32) -> String {
    merged
        .iter()
        .find(|r| r.contains(col, row))
        .map(MergedRange::master)
        .unwrap_or_else(|| compose_addr(col, row))
}

fn clear_marker_fills(sheet: &mut Worksheet) -> usize {
    let marked: Vec<String> = sheet
        .get_cell_collection()
        .iter()
        .filter(|cell| is_marker(cell.get_style()))
        .map(|cell| {
            let coord = cell.get_coordinate();
            compose_addr(*coord.get_col_num(), *coord.get_row_num())
        })
        .collect();

    for addr in &marked {
        clear_fill(sheet.get_style_mut(addr.as_str()));
    }
    marked.len()
}

fn is_marker(style: &Style) -> bool {
    style
        .get_fill()
        .as_ref()
        .and_then(|fill| fill.get_pattern_fill())
        .is_some_and(|pattern| {
            *pattern.get_pattern_type() == PatternValues::Solid
                && pattern
                    .get_foreground_color()
                    .is_some_and(|c| c.get_argb() == MARKER_ARGB)
        })
}

fn clear_fill(style: &mut Style) {
    style
        .get_fill_mut()
        .get_pattern_fill_mut()
        .set_pattern_type(PatternValues::None);
}

/// Pinta una celda con el relleno marcador, para construir plantillas
/// de prueba en memoria.
#[cfg(test)]
pub fn set_marker_fill(style: &mut Style) {
    let mut color = umya_spreadsheet::Color::default();
    color.set_argb(MARKER_ARGB);
    let pattern = style.get_fill_mut().get_pattern_fill_mut();
    pattern.set_pattern_type(PatternValues::Solid);
    pattern.set_foreground_color(color);
}

// --- Direcciones A1 ---

fn parse_addr(addr: &str) -> Option<(u32, u32)> {
    let addr = addr.trim();
    let split = addr.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = addr.split_at(split);
    if letters.is_empty() {
        return None;
    }

    let mut col = 0u32;
    for c in letters.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        col = col * 26 + (c as u32 - 'A' as u32 + 1);
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((col, row))
}

fn compose_addr(col: u32, row: u32) -> String {
    let mut letters = String::new();
    let mut c = col;
    while c > 0 {
        let rem = (c - 1) % 26;
        letters.insert(0, (b'A' + rem as u8) as char);
        c = (c - 1) / 26;
    }
    format!("{letters}{row}")
}

fn parse_range(range: &str) -> Option<MergedRange> {
    let (start, end) = match range.split_once(':') {
        Some((s, e)) => (s, e),
        None => (range, range),
    };
    let (col_start, row_start) = parse_addr(start)?;
    let (col_end, row_end) = parse_addr(end)?;
    Some(MergedRange { col_start, row_start, col_end, row_end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingRow;
    use serde_json::json;

    fn row(cell: &str, placeholder: &str) -> MappingRow {
        MappingRow {
            cell: cell.to_string(),
            raw_text: format!("{{{placeholder}}}"),
            placeholder: placeholder.to_string(),
        }
    }

    /// Plantilla mínima en memoria: hoja "Scoring del Cliente" con un
    /// marcador rojo en B5, texto previo en C7 y la región K7:K8.
    fn template_bytes() -> Vec<u8> {
        let mut book = umya_spreadsheet::new_file();
        let sheet = book.get_sheet_mut(&0).unwrap();
        sheet.set_name("Scoring del Cliente");

        set_marker_fill(sheet.get_style_mut("B5"));
        sheet.get_cell_mut("C7").set_value_string("texto previo");
        sheet.get_cell_mut("K7").set_value_string("se vacía");
        sheet.add_merge_cells("K7:K8");

        let mut out = Cursor::new(Vec::new());
        writer::xlsx::write_writer(&book, &mut out).unwrap();
        out.into_inner()
    }

    fn reread(bytes: &[u8]) -> umya_spreadsheet::Spreadsheet {
        reader::xlsx::read_reader(Cursor::new(bytes.to_vec()), true).unwrap()
    }

    #[test]
    fn addr_roundtrip() {
        assert_eq!(parse_addr("B5"), Some((2, 5)));
        assert_eq!(parse_addr("AA10"), Some((27, 10)));
        assert_eq!(compose_addr(2, 5), "B5");
        assert_eq!(compose_addr(27, 10), "AA10");
        assert_eq!(parse_addr("5"), None);
        assert_eq!(parse_addr("B0"), None);
    }

    #[test]
    fn merged_master_redirects_inside_range() {
        let merged = vec![parse_range("K7:K8").unwrap()];
        assert_eq!(master_addr(&merged, 11, 8), "K7");
        assert_eq!(master_addr(&merged, 11, 7), "K7");
        assert_eq!(master_addr(&merged, 2, 5), "B5");
    }

    #[test]
    fn render_writes_values_and_clears_missing() {
        let mappings = vec![row("B5", "cliente.nombre"), row("C7", "campo_ausente")];
        let record = json!({"cliente": {"nombre": "Ana"}});

        let bytes = render(
            &template_bytes(),
            "Scoring del Cliente",
            &mappings,
            &record,
            &PostRule::None,
            None,
        )
        .unwrap();

        let book = reread(&bytes);
        let sheet = book.get_sheet_by_name("Scoring del Cliente").unwrap();
        assert_eq!(sheet.get_value("B5"), "Ana");
        // El texto previo desaparece cuando no llega dato.
        assert_eq!(sheet.get_value("C7"), "");
    }

    #[test]
    fn render_coerces_numeric_strings() {
        let mappings = vec![row("B5", "monto")];
        let record = json!({"monto": "$1,500"});

        let bytes = render(
            &template_bytes(),
            "Scoring del Cliente",
            &mappings,
            &record,
            &PostRule::None,
            None,
        )
        .unwrap();

        let book = reread(&bytes);
        let sheet = book.get_sheet_by_name("Scoring del Cliente").unwrap();
        assert_eq!(sheet.get_value("B5"), "1500");
    }

    #[test]
    fn clear_cells_rule_targets_merged_master() {
        let bytes = render(
            &template_bytes(),
            "Scoring del Cliente",
            &[],
            &json!({"x": 1}),
            &PostRule::ClearCells(&["K7", "K8"]),
            None,
        )
        .unwrap();

        let book = reread(&bytes);
        let sheet = book.get_sheet_by_name("Scoring del Cliente").unwrap();
        assert_eq!(sheet.get_value("K7"), "");
    }

    #[test]
    fn protect_rule_requires_secret() {
        let err = render(
            &template_bytes(),
            "Scoring del Cliente",
            &[],
            &json!({"x": 1}),
            &PostRule::Protect,
            None,
        )
        .unwrap_err();

        assert_eq!(err.stage(), "configuracion");
    }

    #[test]
    fn missing_sheet_is_a_render_error() {
        let err = render(
            &template_bytes(),
            "Hoja Inexistente",
            &[],
            &json!({"x": 1}),
            &PostRule::None,
            None,
        )
        .unwrap_err();

        assert_eq!(err.stage(), "render");
    }

    #[test]
    fn dynamic_password_is_15_hex_chars() {
        let pwd = dynamic_password("frase");
        assert_eq!(pwd.len(), 15);
        assert!(pwd.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn marker_fill_roundtrip_is_detected() {
        let mut book = umya_spreadsheet::new_file();
        let sheet = book.get_sheet_mut(&0).unwrap();
        set_marker_fill(sheet.get_style_mut("A1"));

        assert!(is_marker(sheet.get_style_mut("A1")));
        assert_eq!(clear_marker_fills(sheet), 1);
        assert!(!is_marker(sheet.get_style_mut("A1")));
    }
}
