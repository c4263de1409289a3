//! Carga y gestión de configuración de la aplicación (Supabase + N8N).

use std::env;
use anyhow::{anyhow, Result};

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_key: String,
    pub bucket_plantillas: String,
    pub bucket_generados: String,
    pub server_addr: String,

    /// Webhook de N8N para entregar documentos generados. Opcional.
    pub n8n_webhook_url: Option<String>,
    /// Frase para derivar la contraseña de protección de hojas Excel.
    pub frase_secreta: Option<String>,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let supabase_url = env::var("SUPABASE_URL")
            .map_err(|_| anyhow!("Falta SUPABASE_URL en el entorno"))?;
        let supabase_key = env::var("SUPABASE_KEY")
            .map_err(|_| anyhow!("Falta SUPABASE_KEY en el entorno"))?;

        let bucket_plantillas = env::var("BUCKET_PLANTILLAS")
            .unwrap_or_else(|_| "plantillas-documentos".to_string());
        let bucket_generados = env::var("BUCKET_GENERADOS")
            .unwrap_or_else(|_| "documentos-generados".to_string());

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let n8n_webhook_url = env::var("N8N_WEBHOOK_URL").ok().filter(|v| !v.is_empty());
        let frase_secreta = env::var("FRASE_SECRETA_EXCEL").ok().filter(|v| !v.is_empty());

        Ok(Self {
            supabase_url,
            supabase_key,
            bucket_plantillas,
            bucket_generados,
            server_addr,
            n8n_webhook_url,
            frase_secreta,
        })
    }
}
