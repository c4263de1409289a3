//! Taxonomía de errores del constructor de documentos.
//!
//! Todo fallo llega al llamador como resultado estructurado: el handler
//! HTTP lo convierte en JSON con `etapa` y `formato`, nunca como panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    /// Tabla de mapeo o plantilla no se pudo localizar/descargar.
    #[error("error de configuración: {0}")]
    Configuration(String),

    /// Los datos de entrada no contienen ningún campo utilizable.
    #[error("error de validación: {0}")]
    Validation(String),

    /// Fallo de la librería de documentos al sustituir datos.
    #[error("error de render: {0}")]
    Render(String),

    /// Fallo del almacenamiento externo (descarga/subida).
    #[error("error de almacenamiento: {0}")]
    Storage(String),
}

impl DocumentError {
    /// Etapa del pipeline en la que se produjo el fallo, para el
    /// descriptor legible por máquina de la respuesta HTTP.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuracion",
            Self::Validation(_) => "validacion",
            Self::Render(_) => "render",
            Self::Storage(_) => "almacenamiento",
        }
    }
}

pub type Result<T> = std::result::Result<T, DocumentError>;
