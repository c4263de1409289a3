//! Ensamblado de documentos: tabla estática de formatos, orquestación
//! del relleno, nombre de archivo y hash de contenido.

use chrono::Local;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::alias;
use crate::error::{DocumentError, Result};
use crate::excel::{self, PostRule};
use crate::flatten::{flatten, FlatIndex};
use crate::mapping::MappingCache;
use crate::storage::DocumentStorage;
use crate::word;

pub const MIME_XLSX: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemplateKind {
    Excel,
    Word,
}

/// Entrada de la tabla de formatos: datos, no ramas.
pub struct FormatSpec {
    pub formato: &'static str,
    pub kind: TemplateKind,
    pub template: &'static str,
    /// Hoja destino; vacío para documentos Word.
    pub sheet: &'static str,
    pub post_rule: PostRule,
    /// Prefijo del nombre de archivo generado.
    pub file_prefix: &'static str,
}

pub const FORMATS: &[FormatSpec] = &[
    FormatSpec {
        formato: "con_HC",
        kind: TemplateKind::Excel,
        template: "SCORING_CON_HC.xlsx",
        sheet: "Scoring del Cliente",
        post_rule: PostRule::None,
        file_prefix: "SUMATE_SCORING_CON_HC",
    },
    FormatSpec {
        formato: "sin_HC",
        kind: TemplateKind::Excel,
        template: "SCORING_SIN_HC.xlsx",
        sheet: "Scoring del Cliente",
        post_rule: PostRule::ClearCells(&["K7", "K8"]),
        file_prefix: "SUMATE_SCORING_SIN_HC",
    },
    FormatSpec {
        formato: "expediente_sumate",
        kind: TemplateKind::Excel,
        template: "EXPEDIENTE_SUMATE.xlsx",
        sheet: "Hoja1",
        post_rule: PostRule::Protect,
        file_prefix: "SUMATE_EXPEDIENTE",
    },
    FormatSpec {
        formato: "solicitud_credito",
        kind: TemplateKind::Excel,
        template: "SOLICITUD_CREDITO.xlsx",
        sheet: "Hoja1",
        post_rule: PostRule::None,
        file_prefix: "SUMATE_SOLICITUD_CREDITO",
    },
    FormatSpec {
        formato: "general",
        kind: TemplateKind::Excel,
        template: "Formato_Editable_Listo.xlsx",
        sheet: "Ficha de identificación",
        post_rule: PostRule::None,
        file_prefix: "SUMATE_DOCUMENTO",
    },
    // Estas tres fichas comparten la plantilla editable general pero
    // cargan su propia tabla de mapeo.
    FormatSpec {
        formato: "evaluacion_economica",
        kind: TemplateKind::Excel,
        template: "Formato_Editable_Listo.xlsx",
        sheet: "Ficha de identificación",
        post_rule: PostRule::None,
        file_prefix: "SUMATE_DOCUMENTO",
    },
    FormatSpec {
        formato: "seguimiento",
        kind: TemplateKind::Excel,
        template: "Formato_Editable_Listo.xlsx",
        sheet: "Ficha de identificación",
        post_rule: PostRule::None,
        file_prefix: "SUMATE_DOCUMENTO",
    },
    FormatSpec {
        formato: "scoring_etiquetas",
        kind: TemplateKind::Excel,
        template: "Formato_Editable_Listo.xlsx",
        sheet: "Ficha de identificación",
        post_rule: PostRule::None,
        file_prefix: "SUMATE_DOCUMENTO",
    },
    FormatSpec {
        formato: "visita_domiciliaria",
        kind: TemplateKind::Word,
        template: "Visita domiciliaria con etiquetas.docx",
        sheet: "",
        post_rule: PostRule::None,
        file_prefix: "SUMATE_VISITA_DOMICILIARIA",
    },
    FormatSpec {
        formato: "obligado_solidario",
        kind: TemplateKind::Word,
        template: "Fichadeidentificaciondelobligadosolidarioconetiquetas.docx",
        sheet: "",
        post_rule: PostRule::None,
        file_prefix: "SUMATE_OBLIGADO_SOLIDARIO",
    },
    FormatSpec {
        formato: "ficha_aval",
        kind: TemplateKind::Word,
        template: "ficha_de_identificacion_del_aval_con_etiquetas.docx",
        sheet: "",
        post_rule: PostRule::None,
        file_prefix: "SUMATE_FICHA_AVAL",
    },
];

/// Formato desconocido cae en `general`, igual que un webhook sin
/// formato explícito.
pub fn format_spec(formato: &str) -> &'static FormatSpec {
    FORMATS
        .iter()
        .find(|f| f.formato == formato)
        .unwrap_or_else(|| {
            FORMATS
                .iter()
                .find(|f| f.formato == "general")
                .expect("tabla de formatos sin entrada general")
        })
}

/// Documento ya generado, listo para responder/subir/entregar.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub formato: String,
    pub data_hash: String,
}

/// Pipeline completo para un formato y un registro de datos.
pub async fn build_document(
    storage: &dyn DocumentStorage,
    cache: &MappingCache,
    secret_phrase: Option<&str>,
    formato: &str,
    datos: &Value,
) -> Result<GeneratedDocument> {
    // Un array entrega sólo su primer elemento.
    let datos = match datos {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };

    let filtered = filter_non_null(datos);
    if filtered.is_empty() {
        return Err(DocumentError::Validation(
            "no hay datos válidos para procesar".to_string(),
        ));
    }
    let record = Value::Object(filtered);

    let spec = format_spec(formato);
    info!("Generando documento formato {} con plantilla {}", formato, spec.template);

    let template = storage.download_template(spec.template).await.map_err(|e| {
        DocumentError::Configuration(format!("plantilla {} no disponible: {e}", spec.template))
    })?;

    let bytes = match spec.kind {
        TemplateKind::Excel => {
            // La tabla de mapeo sigue al formato pedido aunque la
            // plantilla caiga en la entrada general.
            let mappings = cache.get_or_load(formato, storage).await?;
            excel::render(&template, spec.sheet, &mappings, &record, &spec.post_rule, secret_phrase)?
        }
        TemplateKind::Word => word::render(&template, &record)?,
    };

    let file_name = build_file_name(&record, formato, spec);
    let data_hash = data_hash(&record);

    Ok(GeneratedDocument {
        file_name,
        bytes,
        mime_type: match spec.kind {
            TemplateKind::Excel => MIME_XLSX,
            TemplateKind::Word => MIME_DOCX,
        },
        formato: formato.to_string(),
        data_hash,
    })
}

/// Descarta claves de primer nivel con `null` o cadena vacía.
pub fn filter_non_null(datos: &Value) -> Map<String, Value> {
    let Value::Object(map) = datos else {
        return Map::new();
    };
    map.iter()
        .filter(|(_, v)| match v {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Hash sha256 en hex de la serialización canónica (claves ordenadas)
/// de los datos filtrados. Sólo detección de cambios.
pub fn data_hash(record: &Value) -> String {
    let canonical = serde_json::to_string(record).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Nombre de archivo por formato: prefijo + partes del nombre del
/// cliente en mayúsculas saneadas + fecha `DD-MM-YYYY`.
pub fn build_file_name(record: &Value, formato: &str, spec: &FormatSpec) -> String {
    let date = Local::now().format("%d-%m-%Y");
    let index = alias::resolve(flatten(record));
    let extension = match spec.kind {
        TemplateKind::Excel => "xlsx",
        TemplateKind::Word => "docx",
    };

    if formato == "expediente_sumate" {
        let expediente = first_text(&index, &["numero_de_expediente", "expediente"])
            .unwrap_or_else(|| "SIN_EXPEDIENTE".to_string());
        let nombre = full_name(&index).unwrap_or_else(|| "SIN_NOMBRE".to_string());
        return format!(
            "{}_{}_{}_{date}.{extension}",
            spec.file_prefix,
            sanitize_for_filename_upper(&expediente),
            sanitize_for_filename_upper(&nombre),
        );
    }

    let (nombre, codigo) = name_parts(&index);
    format!("{}_{nombre}_{codigo}_{date}.{extension}", spec.file_prefix)
}

/// Nombre del cliente y código de prospecto, saneados en mayúsculas,
/// con cadenas de respaldo para registros planos.
pub fn name_parts(index: &FlatIndex) -> (String, String) {
    let nombre = full_name(index).unwrap_or_default();
    let codigo = first_text(
        index,
        &["codigo_de_prospecto", "codigo_de_cliente", "codigo", "id"],
    )
    .unwrap_or_else(|| "SIN_CODIGO".to_string());

    (
        sanitize_for_filename_upper(&nombre),
        sanitize_for_filename_upper(&codigo),
    )
}

fn full_name(index: &FlatIndex) -> Option<String> {
    let first = first_text(
        index,
        &["cliente.primer_nombre", "cliente.nombre", "nombre", "primer_nombre"],
    )
    .unwrap_or_default();
    let last = first_text(
        index,
        &["cliente.apellido_paterno", "apellido_paterno", "apellido", "primer_apellido"],
    )
    .unwrap_or_default();

    let full = format!("{first} {last}").trim().to_string();
    (!full.is_empty()).then_some(full)
}

fn first_text(index: &FlatIndex, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(v) = index.get(*key) {
            let text = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !text.trim().is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Mayúsculas sin acentos, todo lo no alfanumérico colapsado a `_`.
pub fn sanitize_for_filename_upper(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_sep = true;
    for c in value.chars().map(strip_accent) {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        "SIN_VALOR".to_string()
    } else {
        trimmed.to_string()
    }
}

fn strip_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        'Á' | 'À' | 'Ä' | 'Â' => 'A',
        'É' | 'È' | 'Ë' | 'Ê' => 'E',
        'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
        'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
        'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
        'Ñ' => 'N',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::io::Cursor;

    fn excel_template(sheet_name: &str) -> Vec<u8> {
        let mut book = umya_spreadsheet::new_file();
        book.get_sheet_mut(&0).unwrap().set_name(sheet_name);
        let mut out = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut out).unwrap();
        out.into_inner()
    }

    #[test]
    fn sanitize_strips_accents_and_collapses() {
        assert_eq!(sanitize_for_filename_upper("Ana Díaz"), "ANA_DIAZ");
        assert_eq!(sanitize_for_filename_upper("  ñoño--123 "), "NONO_123");
        assert_eq!(sanitize_for_filename_upper("***"), "SIN_VALOR");
        assert_eq!(sanitize_for_filename_upper(""), "SIN_VALOR");
    }

    #[test]
    fn unknown_format_falls_back_to_general() {
        assert_eq!(format_spec("no_existe").formato, "general");
        assert_eq!(format_spec("sin_HC").template, "SCORING_SIN_HC.xlsx");
    }

    #[test]
    fn filter_drops_null_and_empty_strings() {
        let filtered = filter_non_null(&json!({
            "a": "x", "b": null, "c": "", "d": 0, "e": false
        }));

        assert_eq!(filtered.len(), 3);
        assert!(filtered.contains_key("a"));
        assert!(filtered.contains_key("d"));
        assert!(filtered.contains_key("e"));
    }

    #[test]
    fn hash_is_deterministic_and_input_sensitive() {
        let a = data_hash(&json!({"x": 1, "y": "z"}));
        let b = data_hash(&json!({"x": 1, "y": "z"}));
        let c = data_hash(&json!({"x": 2, "y": "z"}));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn name_parts_fall_back_to_plain_fields() {
        let index = alias::resolve(flatten(&json!({
            "primer_nombre": "Ana",
            "primer_apellido": "Díaz",
            "codigo": "P1"
        })));
        let (nombre, codigo) = name_parts(&index);

        assert_eq!(nombre, "ANA_DIAZ");
        assert_eq!(codigo, "P1");
    }

    #[test]
    fn expediente_file_name_uses_expediente_and_client() {
        let spec = format_spec("expediente_sumate");
        let record = json!({
            "numero_de_expediente": "EXP-99",
            "nombre": "José",
            "apellido_paterno": "Pérez"
        });
        let name = build_file_name(&record, "expediente_sumate", spec);

        assert!(name.starts_with("SUMATE_EXPEDIENTE_EXP_99_JOSE_PEREZ_"));
        assert!(name.ends_with(".xlsx"));
    }

    #[tokio::test]
    async fn empty_payload_is_a_validation_error() {
        let storage = MemoryStorage::new();
        let cache = MappingCache::new();

        let err = build_document(&storage, &cache, None, "general", &json!({"a": null, "b": ""}))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "validacion");
    }

    #[tokio::test]
    async fn missing_template_is_a_configuration_error() {
        let storage = MemoryStorage::new();
        let cache = MappingCache::new();

        let err = build_document(&storage, &cache, None, "con_HC", &json!({"nombre": "Ana"}))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), "configuracion");
    }

    #[tokio::test]
    async fn general_end_to_end_names_and_hashes() {
        let csv = "cell,raw_text,placeholder\nB5,{primer_nombre},primer_nombre\n";
        let storage = MemoryStorage::new()
            .with_template("Formato_Editable_Listo.xlsx", excel_template("Ficha de identificación"))
            .with_template("Mapfield_general.csv", csv.as_bytes().to_vec());
        let cache = MappingCache::new();

        let datos = json!({
            "primer_nombre": "Ana",
            "primer_apellido": "Díaz",
            "codigo": "P1"
        });

        let doc = build_document(&storage, &cache, None, "general", &datos)
            .await
            .unwrap();
        let again = build_document(&storage, &cache, None, "general", &datos)
            .await
            .unwrap();

        let today = Local::now().format("%d-%m-%Y").to_string();
        assert!(doc.file_name.contains("ANA_DIAZ"));
        assert!(doc.file_name.contains("P1"));
        assert!(doc.file_name.contains(&today));
        assert!(doc.file_name.ends_with(".xlsx"));
        assert_eq!(doc.mime_type, MIME_XLSX);
        assert_eq!(doc.data_hash, again.data_hash);
        assert!(!doc.bytes.is_empty());
    }

    #[tokio::test]
    async fn word_format_renders_tokens() {
        let template = crate::word::tests::minimal_docx("Visita de {cliente.nombre}");
        let storage = MemoryStorage::new()
            .with_template("Visita domiciliaria con etiquetas.docx", template);
        let cache = MappingCache::new();

        let doc = build_document(
            &storage,
            &cache,
            None,
            "visita_domiciliaria",
            &json!({"nombre": "Ana", "codigo": "P1"}),
        )
        .await
        .unwrap();

        assert_eq!(doc.mime_type, MIME_DOCX);
        assert!(doc.file_name.starts_with("SUMATE_VISITA_DOMICILIARIA_ANA_P1_"));
        assert!(doc.file_name.ends_with(".docx"));
    }
}
