//! Almacenamiento externo de plantillas y documentos generados.
//!
//! El trait `DocumentStorage` es la costura inyectable del servicio:
//! producción usa `SupabaseStorage` (API REST de Supabase Storage y
//! PostgREST) y las pruebas usan `MemoryStorage`.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::{DocumentError, Result};

/// Metadata persistida por cada documento generado.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedMetadata {
    pub paciente_id: Option<String>,
    pub formato: String,
    pub numero_de_expediente: Option<String>,
    pub wa_id: Option<String>,
    pub storage_path: String,
    pub nombre_archivo: String,
    pub data_hash: String,
    pub fecha_generacion: String,
}

/// Filtros para consultar el historial de documentos generados.
#[derive(Debug, Clone)]
pub struct MetadataQuery {
    pub id: Option<String>,
    pub paciente_id: Option<String>,
    pub formato: Option<String>,
    pub limite: u32,
}

impl Default for MetadataQuery {
    fn default() -> Self {
        Self {
            id: None,
            paciente_id: None,
            formato: None,
            limite: 50,
        }
    }
}

#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Descarga una plantilla (o tabla de mapeo CSV) por nombre.
    async fn download_template(&self, name: &str) -> Result<Vec<u8>>;

    /// Lista los nombres de archivo del bucket de plantillas.
    async fn list_templates(&self) -> Result<Vec<String>>;

    /// Sube un documento generado y devuelve su ruta en el bucket.
    async fn upload_generated(&self, file_name: &str, bytes: &[u8], mime_type: &str)
        -> Result<String>;

    /// Registra la metadata del documento en la tabla de generados.
    async fn save_metadata(&self, metadata: &GeneratedMetadata) -> Result<()>;

    /// Consulta el historial de generados, más recientes primero.
    async fn query_metadata(&self, query: &MetadataQuery) -> Result<Vec<serde_json::Value>>;

    /// Descarga un documento ya generado del bucket de generados.
    async fn download_generated(&self, file_name: &str) -> Result<Vec<u8>>;

    /// URL pública de un archivo ya subido.
    fn public_url(&self, file_name: &str) -> String;
}

/// Implementación contra Supabase: Storage para los archivos y
/// PostgREST para la tabla `documentos_generados_sumate`.
pub struct SupabaseStorage {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket_plantillas: String,
    bucket_generados: String,
}

impl SupabaseStorage {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DocumentError::Storage(format!("cliente HTTP: {e}")))?;

        Ok(Self {
            http,
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            api_key: config.supabase_key.clone(),
            bucket_plantillas: config.bucket_plantillas.clone(),
            bucket_generados: config.bucket_generados.clone(),
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl DocumentStorage for SupabaseStorage {
    async fn download_template(&self, name: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket_plantillas, name
        );

        let response = self
            .auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| DocumentError::Storage(format!("descargando plantilla {name}: {e}")))?;

        if !response.status().is_success() {
            error!("Error descargando plantilla {}: HTTP {}", name, response.status());
            return Err(DocumentError::Storage(format!(
                "plantilla {name}: HTTP {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DocumentError::Storage(format!("leyendo plantilla {name}: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn list_templates(&self) -> Result<Vec<String>> {
        let url = format!(
            "{}/storage/v1/object/list/{}",
            self.base_url, self.bucket_plantillas
        );

        let response = self
            .auth(self.http.post(&url))
            .json(&json!({ "prefix": "", "limit": 200 }))
            .send()
            .await
            .map_err(|e| DocumentError::Storage(format!("listando plantillas: {e}")))?;

        if !response.status().is_success() {
            return Err(DocumentError::Storage(format!(
                "listando plantillas: HTTP {}",
                response.status()
            )));
        }

        let entries: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| DocumentError::Storage(format!("respuesta de listado: {e}")))?;

        let names = entries
            .iter()
            .filter_map(|e| e.get("name").and_then(|n| n.as_str()))
            .map(str::to_string)
            .collect::<Vec<_>>();

        info!("Encontradas {} plantillas en el bucket {}", names.len(), self.bucket_plantillas);
        Ok(names)
    }

    async fn upload_generated(&self, file_name: &str, bytes: &[u8], mime_type: &str)
        -> Result<String>
    {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket_generados, file_name
        );

        let response = self
            .auth(self.http.post(&url))
            .header("Content-Type", mime_type.to_string())
            .header("x-upsert", "true")
            .header("cache-control", "max-age=3600")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| DocumentError::Storage(format!("subiendo {file_name}: {e}")))?;

        if !response.status().is_success() {
            return Err(DocumentError::Storage(format!(
                "subiendo {file_name}: HTTP {}",
                response.status()
            )));
        }

        info!("Documento subido a storage: {}/{}", self.bucket_generados, file_name);
        Ok(format!("{}/{}", self.bucket_generados, file_name))
    }

    async fn save_metadata(&self, metadata: &GeneratedMetadata) -> Result<()> {
        let url = format!("{}/rest/v1/documentos_generados_sumate", self.base_url);

        let response = self
            .auth(self.http.post(&url))
            .header("Prefer", "return=minimal")
            .json(metadata)
            .send()
            .await
            .map_err(|e| DocumentError::Storage(format!("guardando metadata: {e}")))?;

        if !response.status().is_success() {
            return Err(DocumentError::Storage(format!(
                "guardando metadata: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn query_metadata(&self, query: &MetadataQuery) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/rest/v1/documentos_generados_sumate", self.base_url);

        let mut params: Vec<(&str, String)> = vec![
            ("select", "*".to_string()),
            ("order", "fecha_generacion.desc".to_string()),
            ("limit", query.limite.to_string()),
        ];
        if let Some(id) = &query.id {
            params.push(("id", format!("eq.{id}")));
        }
        if let Some(paciente) = &query.paciente_id {
            params.push(("paciente_id", format!("eq.{paciente}")));
        }
        if let Some(formato) = &query.formato {
            params.push(("formato", format!("eq.{formato}")));
        }

        let response = self
            .auth(self.http.get(&url))
            .query(&params)
            .send()
            .await
            .map_err(|e| DocumentError::Storage(format!("consultando historial: {e}")))?;

        if !response.status().is_success() {
            return Err(DocumentError::Storage(format!(
                "consultando historial: HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DocumentError::Storage(format!("respuesta de historial: {e}")))
    }

    async fn download_generated(&self, file_name: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket_generados, file_name
        );

        let response = self
            .auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| DocumentError::Storage(format!("descargando generado {file_name}: {e}")))?;

        if !response.status().is_success() {
            return Err(DocumentError::Storage(format!(
                "generado {file_name}: HTTP {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DocumentError::Storage(format!("leyendo generado {file_name}: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn public_url(&self, file_name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket_generados, file_name
        )
    }
}

/// Doble de pruebas: plantillas precargadas en memoria y registro de
/// todo lo subido, sin red.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
    templates: HashMap<String, Vec<u8>>,
    pub uploaded: Mutex<Vec<(String, Vec<u8>, String)>>,
    pub metadata: Mutex<Vec<GeneratedMetadata>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.templates.insert(name.to_string(), bytes);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl DocumentStorage for MemoryStorage {
    async fn download_template(&self, name: &str) -> Result<Vec<u8>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| DocumentError::Configuration(format!("plantilla no encontrada: {name}")))
    }

    async fn list_templates(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn upload_generated(&self, file_name: &str, bytes: &[u8], mime_type: &str)
        -> Result<String>
    {
        self.uploaded
            .lock()
            .map_err(|_| DocumentError::Storage("lock envenenado".into()))?
            .push((file_name.to_string(), bytes.to_vec(), mime_type.to_string()));
        Ok(format!("memoria/{file_name}"))
    }

    async fn save_metadata(&self, metadata: &GeneratedMetadata) -> Result<()> {
        self.metadata
            .lock()
            .map_err(|_| DocumentError::Storage("lock envenenado".into()))?
            .push(metadata.clone());
        Ok(())
    }

    /// El doble usa `nombre_archivo` como id de fila.
    async fn query_metadata(&self, query: &MetadataQuery) -> Result<Vec<serde_json::Value>> {
        let rows = self
            .metadata
            .lock()
            .map_err(|_| DocumentError::Storage("lock envenenado".into()))?;

        let matches = |m: &GeneratedMetadata| {
            query.id.as_deref().map_or(true, |id| m.nombre_archivo == id)
                && query
                    .paciente_id
                    .as_deref()
                    .map_or(true, |p| m.paciente_id.as_deref() == Some(p))
                && query.formato.as_deref().map_or(true, |f| m.formato == f)
        };

        let mut out = Vec::new();
        for m in rows.iter().rev().filter(|m| matches(m)) {
            if out.len() >= query.limite as usize {
                break;
            }
            let mut row = serde_json::to_value(m)
                .map_err(|e| DocumentError::Storage(format!("serializando fila: {e}")))?;
            if let serde_json::Value::Object(map) = &mut row {
                map.insert("id".to_string(), serde_json::json!(m.nombre_archivo));
            }
            out.push(row);
        }
        Ok(out)
    }

    async fn download_generated(&self, file_name: &str) -> Result<Vec<u8>> {
        self.uploaded
            .lock()
            .map_err(|_| DocumentError::Storage("lock envenenado".into()))?
            .iter()
            .find(|(name, _, _)| name == file_name)
            .map(|(_, bytes, _)| bytes.clone())
            .ok_or_else(|| DocumentError::Storage(format!("generado no encontrado: {file_name}")))
    }

    fn public_url(&self, file_name: &str) -> String {
        format!("memoria://{file_name}")
    }
}

impl GeneratedMetadata {
    /// Construye la metadata estándar a partir de los datos de entrada
    /// ya aplanados y el resultado de la generación.
    pub fn build(
        formato: &str,
        file_name: &str,
        storage_path: &str,
        data_hash: &str,
        paciente_id: Option<String>,
        numero_de_expediente: Option<String>,
        wa_id: Option<String>,
    ) -> Self {
        Self {
            paciente_id,
            formato: formato.to_string(),
            numero_de_expediente,
            wa_id,
            storage_path: storage_path.to_string(),
            nombre_archivo: file_name.to_string(),
            data_hash: data_hash.to_string(),
            fecha_generacion: Utc::now().to_rfc3339(),
        }
    }
}
