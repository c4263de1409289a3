//! Tablas de mapeo CSV: celda destino, marcador con llaves y ruta de
//! campo. Una tabla por formato, cacheada en memoria tras la primera
//! descarga.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{DocumentError, Result};
use crate::storage::DocumentStorage;

/// Fila de la tabla de mapeo.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRow {
    /// Posición destino en la plantilla (p. ej. `B5`).
    pub cell: String,
    /// Marcador textual con llaves (p. ej. `{cliente.nombre}`).
    pub raw_text: String,
    /// Ruta del campo a extraer del índice plano.
    pub placeholder: String,
}

/// Parser CSV deliberadamente simple: cabecera en la primera línea,
/// separación por comas y comillas eliminadas. No soporta comas dentro
/// de campos entrecomillados; las tablas de mapeo no las usan.
pub fn parse_csv(text: &str) -> Vec<MappingRow> {
    let mut lines = text.lines();
    let Some(header_line) = lines.next() else {
        return Vec::new();
    };

    let headers: Vec<String> = header_line
        .split(',')
        .map(|h| h.trim().replace('"', ""))
        .collect();

    let col = |name: &str| headers.iter().position(|h| h == name);
    let (Some(cell_col), Some(raw_col), Some(ph_col)) =
        (col("cell"), col("raw_text"), col("placeholder"))
    else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let values: Vec<String> = line
            .split(',')
            .map(|v| v.trim().replace('"', ""))
            .collect();

        let field = |i: usize| values.get(i).cloned().unwrap_or_default();
        let row = MappingRow {
            cell: field(cell_col),
            raw_text: field(raw_col),
            placeholder: field(ph_col),
        };

        // Sólo filas con celda y marcador; el resto es ruido de edición.
        if !row.cell.is_empty() && !row.raw_text.is_empty() {
            rows.push(row);
        }
    }
    rows
}

/// Nombre del CSV de mapeo para un formato. `general` usa el primer
/// CSV disponible del bucket; si el listado falla o no hay CSV, vuelve
/// al nombre convencional.
pub async fn resolve_csv_name(formato: &str, storage: &dyn DocumentStorage) -> String {
    if formato == "general" {
        match storage.list_templates().await {
            Ok(templates) => {
                if let Some(first_csv) = templates.iter().find(|t| t.ends_with(".csv")) {
                    return first_csv.clone();
                }
            }
            Err(e) => warn!("No se pudo listar el bucket de plantillas: {}", e),
        }
    }
    format!("Mapfield_{formato}.csv")
}

/// Cache de tablas de mapeo por formato.
///
/// La primera carga de un formato no se serializa: dos peticiones
/// concurrentes pueden descargar el mismo CSV y una sobreescribe a la
/// otra con contenido idéntico. Se tolera a cambio de no retener el
/// lock durante la descarga.
#[derive(Default)]
pub struct MappingCache {
    tables: RwLock<HashMap<String, Arc<Vec<MappingRow>>>>,
}

impl MappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(
        &self,
        formato: &str,
        storage: &dyn DocumentStorage,
    ) -> Result<Arc<Vec<MappingRow>>> {
        if let Some(table) = self.tables.read().await.get(formato) {
            return Ok(Arc::clone(table));
        }

        let csv_name = resolve_csv_name(formato, storage).await;
        info!("Cargando mapping {} para formato {}", csv_name, formato);

        let bytes = storage.download_template(&csv_name).await.map_err(|e| {
            DocumentError::Configuration(format!("mapping {csv_name} no disponible: {e}"))
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let rows = Arc::new(parse_csv(&text));

        info!("Mappings cargados: {} filas para formato {}", rows.len(), formato);
        self.tables
            .write()
            .await
            .insert(formato.to_string(), Arc::clone(&rows));
        Ok(rows)
    }
}
