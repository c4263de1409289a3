//! Relleno de plantillas Word (`.docx`).
//!
//! El paquete OOXML se reescribe entrada por entrada: las partes XML
//! del cuerpo, encabezados y pies pasan por la sustitución de
//! marcadores `{ruta.de.campo}` y el resto se copia tal cual. Un
//! marcador partido entre runs de formato distintos no se reconstruye;
//! las plantillas con etiquetas deben mantener cada marcador en un
//! solo run.

use std::io::{Cursor, Read, Write};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::alias;
use crate::coerce::coerce;
use crate::error::{DocumentError, Result};
use crate::flatten::{extract_path, flatten};

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_][A-Za-z0-9_.]*)\}").unwrap())
}

fn is_text_part(name: &str) -> bool {
    name == "word/document.xml"
        || ((name.starts_with("word/header") || name.starts_with("word/footer"))
            && name.ends_with(".xml"))
}

/// Rellena la plantilla y devuelve el `.docx` serializado.
pub fn render(template: &[u8], record: &Value) -> Result<Vec<u8>> {
    let index = alias::resolve(flatten(record));

    let mut archive = ZipArchive::new(Cursor::new(template.to_vec()))
        .map_err(|e| DocumentError::Render(format!("plantilla docx ilegible: {e}")))?;

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut replaced_total = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| DocumentError::Render(format!("entrada zip: {e}")))?;
        let name = entry.name().to_string();
        if entry.is_dir() {
            continue;
        }

        writer
            .start_file(name.clone(), options)
            .map_err(|e| DocumentError::Render(format!("escribiendo {name}: {e}")))?;

        if is_text_part(&name) {
            let mut xml = String::new();
            entry
                .read_to_string(&mut xml)
                .map_err(|e| DocumentError::Render(format!("leyendo {name}: {e}")))?;
            let (replaced, count) = replace_tokens(&xml, &index, record);
            replaced_total += count;
            writer
                .write_all(replaced.as_bytes())
                .map_err(|e| DocumentError::Render(format!("escribiendo {name}: {e}")))?;
        } else {
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| DocumentError::Render(format!("leyendo {name}: {e}")))?;
            writer
                .write_all(&bytes)
                .map_err(|e| DocumentError::Render(format!("escribiendo {name}: {e}")))?;
        }
    }

    let out = writer
        .finish()
        .map_err(|e| DocumentError::Render(format!("cerrando docx: {e}")))?;
    info!("Documento Word renderizado, {} marcadores sustituidos", replaced_total);
    Ok(out.into_inner())
}

/// Sustituye cada marcador por el valor del campo, escapado para XML.
/// Un campo ausente deja cadena vacía: el marcador nunca llega al
/// documento final.
fn replace_tokens(xml: &str, index: &crate::flatten::FlatIndex, record: &Value) -> (String, usize) {
    let mut count = 0usize;
    let replaced = token_re().replace_all(xml, |caps: &regex::Captures<'_>| {
        count += 1;
        let path = &caps[1];
        let value = extract_path(index, record, path);
        escape_xml(&coerce(value.as_ref()).to_text())
    });
    (replaced.into_owned(), count)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Paquete docx mínimo válido con el texto dado como cuerpo.
    pub(crate) fn minimal_docx(body_text: &str) -> Vec<u8> {
        let document = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body><w:p><w:r><w:t>{body_text}</w:t></w:r></w:p></w:body>
</w:document>"#
        );
        let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="xml" ContentType="application/xml"/>
  <Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
</Types>"#;
        let rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
</Relationships>"#;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(content_types.as_bytes()).unwrap();
        writer.start_file("_rels/.rels", options).unwrap();
        writer.write_all(rels.as_bytes()).unwrap();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(document.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn document_xml(docx: &[u8]) -> String {
        let mut archive = ZipArchive::new(Cursor::new(docx.to_vec())).unwrap();
        let mut entry = archive.by_name("word/document.xml").unwrap();
        let mut xml = String::new();
        entry.read_to_string(&mut xml).unwrap();
        xml
    }

    #[test]
    fn tokens_are_replaced_with_field_values() {
        let template = minimal_docx("Nombre: {cliente.nombre}, código: {codigo}");
        let record = json!({"cliente": {"nombre": "Ana"}, "codigo": "P-77"});

        let rendered = render(&template, &record).unwrap();
        let xml = document_xml(&rendered);

        assert!(xml.contains("Nombre: Ana"));
        assert!(xml.contains("código: P-77"));
        assert!(!xml.contains('{'));
    }

    #[test]
    fn missing_fields_collapse_to_empty() {
        let template = minimal_docx("[{no_existe}]");
        let rendered = render(&template, &json!({"x": 1})).unwrap();

        assert!(document_xml(&rendered).contains("[]"));
    }

    #[test]
    fn values_are_xml_escaped() {
        let template = minimal_docx("{empresa}");
        let record = json!({"empresa": "Pérez & Hijos <SA>"});

        let rendered = render(&template, &record).unwrap();
        let xml = document_xml(&rendered);

        assert!(xml.contains("Pérez &amp; Hijos &lt;SA&gt;"));
    }

    #[test]
    fn aliases_apply_to_word_tokens() {
        let template = minimal_docx("{cliente.telefono}");
        let rendered = render(&template, &json!({"telefono": "555-1234"})).unwrap();

        assert!(document_xml(&rendered).contains("555-1234"));
    }

    #[test]
    fn non_text_parts_survive_untouched() {
        let template = minimal_docx("{campo}");
        let rendered = render(&template, &json!({"campo": "v"})).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(rendered)).unwrap();
        assert!(archive.by_name("[Content_Types].xml").is_ok());
        assert!(archive.by_name("_rels/.rels").is_ok());
    }

    #[test]
    fn invalid_zip_is_a_render_error() {
        let err = render(b"no es un zip", &json!({})).unwrap_err();
        assert_eq!(err.stage(), "render");
    }
}
