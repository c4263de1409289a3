//! Entrega de documentos generados al webhook de N8N.
//!
//! El envío es de mejor esfuerzo: un fallo se registra pero nunca tumba
//! la generación del documento.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::assembler::GeneratedDocument;
use crate::error::{DocumentError, Result};

pub struct N8nDelivery {
    http: reqwest::Client,
    webhook_url: String,
}

impl N8nDelivery {
    pub fn new(webhook_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Constructor-Documentos-Sumate/1.0")
            .build()
            .map_err(|e| DocumentError::Configuration(format!("cliente HTTP para N8N: {e}")))?;

        Ok(Self {
            http,
            webhook_url: webhook_url.to_string(),
        })
    }

    /// Publica el documento como JSON con el binario en base64.
    pub async fn push(&self, document: &GeneratedDocument) -> Result<()> {
        let payload = json!({
            "fileName": document.file_name,
            "mimeType": document.mime_type,
            "base64": BASE64.encode(&document.bytes),
            "metadata": {
                "deliveryId": Uuid::new_v4().to_string(),
                "formato": document.formato,
                "dataHash": document.data_hash,
                "generatedAt": Utc::now().to_rfc3339(),
                "source": "constructor-documentos-sumate",
            },
        });

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DocumentError::Storage(format!("enviando a N8N: {e}")))?;

        if !response.status().is_success() {
            return Err(DocumentError::Storage(format!(
                "webhook N8N respondió HTTP {}",
                response.status()
            )));
        }

        info!("Documento {} entregado a N8N", document.file_name);
        Ok(())
    }

    /// Variante que degrada el error a un log.
    pub async fn push_best_effort(&self, document: &GeneratedDocument) {
        if let Err(e) = self.push(document).await {
            error!("Entrega a N8N fallida para {}: {}", document.file_name, e);
        }
    }
}

/// Entrega opcional: si no hay webhook configurado sólo se anota.
pub async fn deliver_if_configured(delivery: Option<&N8nDelivery>, document: &GeneratedDocument) {
    match delivery {
        Some(d) => d.push_best_effort(document).await,
        None => warn!("N8N_WEBHOOK_URL no configurado, se omite la entrega"),
    }
}
