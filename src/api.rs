use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    assembler::{self, GeneratedDocument},
    delivery,
    doctypes,
    error::DocumentError,
    storage::{DocumentStorage, GeneratedMetadata, MetadataQuery},
};

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct GenerarDocumentoPayload {
    pub data: Value,
    #[serde(default = "formato_general")]
    pub formato: String,
    #[serde(default, rename = "saveToStorage")]
    pub save_to_storage: bool,
}

fn formato_general() -> String {
    "general".to_string()
}

#[derive(Deserialize)]
pub struct GenerarMultiplesPayload {
    pub fichas_a_generar: Vec<String>,
    pub datos_prospecto: Value,
}

#[derive(Deserialize)]
pub struct HistorialParams {
    pub formato: Option<String>,
    #[serde(default = "limite_default")]
    pub limite: u32,
}

fn limite_default() -> u32 {
    50
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhook/generar-documento", post(webhook_handler))
        .route("/api/generar-documento", post(generar_documento_handler))
        .route("/api/generar-multiples", post(generar_multiples_handler))
        .route("/api/plantillas", get(plantillas_handler))
        .route("/api/documentos", get(documentos_handler))
        .route("/api/documentos/:paciente_id", get(documentos_handler))
        .route("/api/descargar/:document_id", get(descargar_handler))
        .with_state(app_state)
}

type ApiError = (StatusCode, Json<Value>);

/// Traduce la taxonomía de errores a respuestas HTTP con etapa y formato.
fn error_response(e: &DocumentError, formato: &str) -> ApiError {
    let status = match e {
        DocumentError::Validation(_) => StatusCode::BAD_REQUEST,
        DocumentError::Storage(_) => StatusCode::BAD_GATEWAY,
        DocumentError::Configuration(_) | DocumentError::Render(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(json!({
            "success": false,
            "error": e.to_string(),
            "etapa": e.stage(),
            "formato": formato,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

// --- Handlers ---

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.storage.list_templates().await {
        Ok(templates) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "constructor-de-documentos-sumate",
                "timestamp": Utc::now().to_rfc3339(),
                "checks": {
                    "storage": "healthy",
                    "templatesCount": templates.len(),
                },
            })),
        ),
        Err(e) => {
            error!("Health check fallido: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "service": "constructor-de-documentos-sumate",
                    "timestamp": Utc::now().to_rfc3339(),
                    "checks": { "storage": "error" },
                    "errors": [e.to_string()],
                })),
            )
        }
    }
}

/// Endpoint principal para N8N: recibe el registro completo y responde
/// con el documento como adjunto binario. El formato viene en el propio
/// cuerpo (`formato` o `template`); sin él se usa el general.
#[axum::debug_handler]
async fn webhook_handler(
    State(state): State<AppState>,
    Json(mut body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let formato = body
        .get("formato")
        .or_else(|| body.get("template"))
        .and_then(Value::as_str)
        .unwrap_or("general")
        .to_string();
    strip_routing_fields(&mut body);

    info!("Solicitud de generación recibida, formato {}", formato);

    let document = assembler::build_document(
        state.storage.as_ref(),
        &state.mapping_cache,
        state.secret_phrase(),
        &formato,
        &body,
    )
    .await
    .map_err(|e| {
        error!("Error generando documento ({}): {}", e.stage(), e);
        error_response(&e, &formato)
    })?;

    info!("Documento generado: {}", document.file_name);

    persist_best_effort(&state, &document, &body).await;
    delivery::deliver_if_configured(state.delivery.as_deref(), &document).await;

    let headers = [
        (header::CONTENT_TYPE, document.mime_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", document.file_name),
        ),
    ];
    Ok((headers, document.bytes))
}

/// API directa: responde JSON con el archivo en base64. Con
/// `saveToStorage` además lo sube al bucket de generados.
#[axum::debug_handler]
async fn generar_documento_handler(
    State(state): State<AppState>,
    Json(payload): Json<GenerarDocumentoPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.data.is_null() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "Se requieren datos para generar el documento",
            })),
        ));
    }

    info!("Generando documento formato {}", payload.formato);

    let document = assembler::build_document(
        state.storage.as_ref(),
        &state.mapping_cache,
        state.secret_phrase(),
        &payload.formato,
        &payload.data,
    )
    .await
    .map_err(|e| error_response(&e, &payload.formato))?;

    let storage_url = if payload.save_to_storage {
        persist_best_effort(&state, &document, &payload.data)
            .await
            .map(|path| state.storage.public_url(&path))
    } else {
        None
    };

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "fileName": document.file_name,
                "formato": document.formato,
                "base64Data": BASE64.encode(&document.bytes),
                "storageUrl": storage_url,
                "dataHash": document.data_hash,
            },
            "timestamp": Utc::now().to_rfc3339(),
        })),
    ))
}

/// Genera varias fichas de un prospecto en una sola petición. Los
/// fallos por ficha se acumulan; la petición sólo falla si no se generó
/// ningún documento.
#[axum::debug_handler]
async fn generar_multiples_handler(
    State(state): State<AppState>,
    Json(payload): Json<GenerarMultiplesPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.fichas_a_generar.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "Se requiere al menos una ficha en fichas_a_generar",
            })),
        ));
    }

    let outcome = doctypes::generate_batch(
        state.storage.as_ref(),
        &state.mapping_cache,
        state.secret_phrase(),
        &payload.fichas_a_generar,
        &payload.datos_prospecto,
    )
    .await;

    let documentos: Vec<Value> = outcome
        .documentos
        .iter()
        .map(|d| {
            json!({
                "tipo_ficha": d.tipo_ficha,
                "fileName": d.document.file_name,
                "formato": d.document.formato,
                "base64Data": BASE64.encode(&d.document.bytes),
                "dataHash": d.document.data_hash,
            })
        })
        .collect();

    let errores: Vec<Value> = outcome
        .errores
        .iter()
        .map(|e| json!({ "tipo_ficha": e.tipo_ficha, "error": e.error }))
        .collect();

    let body = json!({
        "success": outcome.success(),
        "documentos_generados": documentos,
        "errores": errores,
        "metadata": {
            "total_solicitados": outcome.total_solicitados,
            "total_generados": outcome.documentos.len(),
            "total_errores": outcome.errores.len(),
            "timestamp": Utc::now().to_rfc3339(),
        },
    });

    let status = if outcome.success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(body)))
}

#[axum::debug_handler]
async fn plantillas_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let templates = state
        .storage
        .list_templates()
        .await
        .map_err(|e| error_response(&e, "n/a"))?;

    let plantillas: Vec<Value> = templates
        .iter()
        .map(|name| {
            let tipo = if name.ends_with(".xlsx") {
                "excel"
            } else if name.ends_with(".docx") || name.ends_with(".doc") {
                "word"
            } else if name.ends_with(".csv") {
                "mapping"
            } else {
                "unknown"
            };
            json!({ "nombre": name, "tipo": tipo })
        })
        .collect();

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "plantillas": plantillas,
            "total": plantillas.len(),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    ))
}

/// Historial de documentos generados, opcionalmente acotado a un
/// paciente y filtrado por formato.
#[axum::debug_handler]
async fn documentos_handler(
    State(state): State<AppState>,
    paciente_id: Option<Path<String>>,
    Query(params): Query<HistorialParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = MetadataQuery {
        paciente_id: paciente_id.map(|Path(p)| p),
        formato: params.formato,
        limite: params.limite,
        ..MetadataQuery::default()
    };

    let documentos = state
        .storage
        .query_metadata(&query)
        .await
        .map_err(|e| error_response(&e, "n/a"))?;

    let total = documentos.len();
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "documentos": documentos,
            "total": total,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    ))
}

/// Descarga un documento ya generado por su id de registro. Responde el
/// binario como adjunto.
#[axum::debug_handler]
async fn descargar_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let query = MetadataQuery {
        id: Some(document_id.clone()),
        limite: 1,
        ..MetadataQuery::default()
    };

    let rows = state
        .storage
        .query_metadata(&query)
        .await
        .map_err(|e| error_response(&e, "n/a"))?;

    let Some(row) = rows.first() else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "error": "Documento no encontrado",
                "timestamp": Utc::now().to_rfc3339(),
            })),
        ));
    };

    let file_name = row
        .get("nombre_archivo")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            error_response(
                &DocumentError::Storage(format!("registro {document_id} sin nombre_archivo")),
                "n/a",
            )
        })?
        .to_string();

    let bytes = state
        .storage
        .download_generated(&file_name)
        .await
        .map_err(|e| error_response(&e, "n/a"))?;

    let mime = if file_name.ends_with(".docx") {
        assembler::MIME_DOCX
    } else {
        assembler::MIME_XLSX
    };
    let headers = [
        (header::CONTENT_TYPE, mime.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        ),
    ];
    Ok((headers, bytes))
}

/// Quita del registro las claves de enrutado del webhook: son control,
/// no datos, y no deben entrar ni al índice plano ni al hash de
/// contenido.
fn strip_routing_fields(body: &mut Value) {
    if let Value::Object(map) = body {
        map.remove("formato");
        map.remove("template");
    }
}

/// Sube el documento y registra su metadata. Cualquier fallo queda en
/// el log sin afectar la respuesta; devuelve la ruta en storage si la
/// subida funcionó.
async fn persist_best_effort(
    state: &AppState,
    document: &GeneratedDocument,
    datos: &Value,
) -> Option<String> {
    let path = match state
        .storage
        .upload_generated(&document.file_name, &document.bytes, &document.mime_type)
        .await
    {
        Ok(path) => path,
        Err(e) => {
            warn!("No se pudo subir {} a storage: {}", document.file_name, e);
            return None;
        }
    };

    let field = |k: &str| {
        datos
            .get(k)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let metadata = GeneratedMetadata::build(
        &document.formato,
        &document.file_name,
        &path,
        &document.data_hash,
        field("paciente_id").or_else(|| field("id")),
        field("numero_de_expediente").or_else(|| field("id_expediente")),
        field("wa_id"),
    );

    if let Err(e) = state.storage.save_metadata(&metadata).await {
        warn!("No se pudo registrar metadata de {}: {}", document.file_name, e);
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingCache;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    fn test_state(storage: MemoryStorage) -> AppState {
        AppState {
            config: crate::config::AppConfig {
                supabase_url: "http://localhost".into(),
                supabase_key: "k".into(),
                bucket_plantillas: "plantillas".into(),
                bucket_generados: "generados".into(),
                server_addr: "127.0.0.1:0".into(),
                n8n_webhook_url: None,
                frase_secreta: None,
            },
            storage: Arc::new(storage),
            mapping_cache: Arc::new(MappingCache::new()),
            delivery: None,
        }
    }

    #[test]
    fn errors_map_to_status_and_stage() {
        let (status, body) = error_response(&DocumentError::Validation("x".into()), "general");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0["etapa"], "validacion");
        assert_eq!(body.0["formato"], "general");

        let (status, _) = error_response(&DocumentError::Storage("x".into()), "general");
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = error_response(&DocumentError::Render("x".into()), "general");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn plantillas_lists_storage_with_types() {
        let storage = MemoryStorage::new()
            .with_template("SCORING_CON_HC.xlsx", vec![1])
            .with_template("Mapfield_con_HC.csv", vec![2])
            .with_template("Visita domiciliaria con etiquetas.docx", vec![3]);
        let state = test_state(storage);

        let response = plantillas_handler(State(state)).await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn persist_records_upload_and_metadata() {
        let memory = Arc::new(MemoryStorage::new());
        let mut state = test_state(MemoryStorage::new());
        state.storage = memory.clone();

        let document = GeneratedDocument {
            file_name: "SUMATE_X.xlsx".into(),
            bytes: vec![1, 2, 3],
            mime_type: assembler::MIME_XLSX.into(),
            formato: "general".into(),
            data_hash: "abc".into(),
        };
        let datos = serde_json::json!({"wa_id": "521555", "id_expediente": "E-1"});

        let path = persist_best_effort(&state, &document, &datos).await;
        assert_eq!(path.as_deref(), Some("memoria/SUMATE_X.xlsx"));

        let uploaded = memory.uploaded.lock().unwrap();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].0, "SUMATE_X.xlsx");

        let metadata = memory.metadata.lock().unwrap();
        assert_eq!(metadata[0].wa_id.as_deref(), Some("521555"));
        assert_eq!(metadata[0].numero_de_expediente.as_deref(), Some("E-1"));
    }

    #[test]
    fn routing_fields_do_not_reach_the_content_hash() {
        let bare = serde_json::json!({"nombre": "Ana"});
        let mut routed = serde_json::json!({"nombre": "Ana", "formato": "general", "template": "x"});
        strip_routing_fields(&mut routed);

        assert_eq!(routed, bare);
        assert_eq!(
            assembler::data_hash(&Value::Object(assembler::filter_non_null(&routed))),
            assembler::data_hash(&Value::Object(assembler::filter_non_null(&bare))),
        );
    }

    #[tokio::test]
    async fn control_only_webhook_body_fails_validation() {
        let storage = MemoryStorage::new();
        let cache = MappingCache::new();
        let mut body = serde_json::json!({"formato": "general"});
        strip_routing_fields(&mut body);

        let err = assembler::build_document(&storage, &cache, None, "general", &body)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "validacion");
    }

    #[tokio::test]
    async fn history_filters_by_patient_and_respects_limit() {
        let memory = MemoryStorage::new();
        for (formato, file, paciente) in [
            ("general", "A.xlsx", Some("p1")),
            ("aval", "B.docx", Some("p2")),
            ("general", "C.xlsx", Some("p1")),
        ] {
            let metadata = GeneratedMetadata::build(
                formato,
                file,
                &format!("generados/{file}"),
                "hash",
                paciente.map(str::to_string),
                None,
                None,
            );
            memory.save_metadata(&metadata).await.unwrap();
        }

        let rows = memory
            .query_metadata(&MetadataQuery {
                paciente_id: Some("p1".into()),
                ..MetadataQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["nombre_archivo"], "C.xlsx");

        let rows = memory
            .query_metadata(&MetadataQuery {
                limite: 1,
                ..MetadataQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["nombre_archivo"], "C.xlsx");
    }

    #[tokio::test]
    async fn history_endpoint_reports_total() {
        let state = test_state(MemoryStorage::new());
        let params = HistorialParams { formato: Some("general".into()), limite: 10 };

        let response = documentos_handler(State(state), None, Query(params)).await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn descargar_returns_the_stored_binary() {
        let memory = Arc::new(MemoryStorage::new());
        let mut state = test_state(MemoryStorage::new());
        state.storage = memory.clone();

        let document = GeneratedDocument {
            file_name: "DIAZ_ANA_aval.docx".into(),
            bytes: vec![7, 7, 7],
            mime_type: assembler::MIME_DOCX.into(),
            formato: "aval".into(),
            data_hash: "abc".into(),
        };
        persist_best_effort(&state, &document, &serde_json::json!({"id": "p1"})).await;

        let response =
            descargar_handler(State(state), Path("DIAZ_ANA_aval.docx".into())).await;
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn descargar_unknown_document_is_404() {
        let state = test_state(MemoryStorage::new());

        let (status, body) = descargar_handler(State(state), Path("nada.xlsx".into()))
            .await
            .map(|_| ())
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.0["error"], "Documento no encontrado");
    }

    #[tokio::test]
    async fn batch_without_fichas_is_rejected() {
        let state = test_state(MemoryStorage::new());
        let payload = GenerarMultiplesPayload {
            fichas_a_generar: vec![],
            datos_prospecto: serde_json::json!({}),
        };

        let result = generar_multiples_handler(State(state), Json(payload)).await;
        assert!(result.is_err());
    }
}
