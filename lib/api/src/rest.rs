use actix_cors::Cors;
use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer, ResponseError, Result as ActixResult};
use polydex_core::{
    DeleteParams, Error, FilterParams, IndexBatch, IndexerConfig, ListParams, QueryDocument,
    SearchParams,
};
use polydex_storage::StorageManager;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Deserialize)]
struct IndexRequest {
    /// encoder name -> documents carrying that encoder's embeddings
    documents: IndexBatch,
}

#[derive(Deserialize)]
struct SearchRequest {
    queries: Vec<QueryDocument>,
    #[serde(default)]
    parameters: SearchParams,
}

#[derive(Serialize)]
struct IndexInfo {
    name: String,
    backend: &'static str,
    documents_count: usize,
    default_scores: Vec<String>,
    traversal_paths: String,
    mapping: serde_json::Value,
}

/// Engine errors rendered as `{"error": "..."}` with a matching status
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::Configuration(_) | Error::Filter(_) | Error::InvalidQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            warn!(error = %self.0, retryable = self.0.is_retryable(), "request failed");
        }
        HttpResponse::build(self.status_code()).json(json!({ "error": self.0.to_string() }))
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

pub struct RestApi;

impl RestApi {
    pub async fn start(storage: Arc<StorageManager>, port: u16) -> std::io::Result<()> {
        info!(port, "starting REST API");
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .wrap(cors)
                .app_data(web::Data::new(storage.clone()))
                .app_data(Self::json_config())
                .configure(Self::configure)
        })
        .bind(("0.0.0.0", port))?
        .run()
        .await
    }

    /// JSON bodies up to 64MB; embeddings make index batches large
    pub fn json_config() -> web::JsonConfig {
        web::JsonConfig::default().limit(64 * 1024 * 1024)
    }

    /// Register all routes. Expects `web::Data<Arc<StorageManager>>`.
    pub fn configure(cfg: &mut web::ServiceConfig) {
        cfg.route("/indexes", web::get().to(list_indexes))
            .route("/indexes/{name}", web::get().to(get_index))
            .route("/indexes/{name}", web::put().to(create_index))
            .route("/indexes/{name}", web::delete().to(drop_index))
            .route("/indexes/{name}/mapping", web::get().to(get_mapping))
            .route("/indexes/{name}/index", web::post().to(index_documents))
            .route("/indexes/{name}/search", web::post().to(search))
            .route("/indexes/{name}/delete", web::post().to(delete_documents))
            .route("/indexes/{name}/list", web::post().to(list_documents))
            .route("/indexes/{name}/filter", web::post().to(filter_documents))
            .route("/indexes/{name}/documents/{id}", web::get().to(get_document));
    }
}

async fn list_indexes(storage: web::Data<Arc<StorageManager>>) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({ "indexes": storage.list_indexes() })))
}

async fn get_index(
    storage: web::Data<Arc<StorageManager>>,
    path: web::Path<String>,
) -> ApiResult {
    let name = path.into_inner();
    let indexer = storage.index(&name)?;
    let info = IndexInfo {
        backend: indexer.backend_kind(),
        documents_count: indexer.count()?,
        default_scores: indexer.default_scores().iter().map(|c| c.key()).collect(),
        traversal_paths: indexer.traversal().to_string(),
        mapping: indexer.mapping(),
        name,
    };
    Ok(HttpResponse::Ok().json(info))
}

async fn create_index(
    storage: web::Data<Arc<StorageManager>>,
    path: web::Path<String>,
    config: web::Json<IndexerConfig>,
) -> ApiResult {
    let indexer = storage.create_index(&path, &config)?;
    Ok(HttpResponse::Ok().json(json!({ "result": true, "mapping": indexer.mapping() })))
}

async fn drop_index(storage: web::Data<Arc<StorageManager>>, path: web::Path<String>) -> ApiResult {
    if storage.drop_index(&path)? {
        Ok(HttpResponse::Ok().json(json!({ "result": true })))
    } else {
        Err(Error::NotFound(format!("index '{}'", path.as_str())).into())
    }
}

async fn get_mapping(storage: web::Data<Arc<StorageManager>>, path: web::Path<String>) -> ApiResult {
    let indexer = storage.index(&path)?;
    Ok(HttpResponse::Ok().json(indexer.mapping()))
}

async fn index_documents(
    storage: web::Data<Arc<StorageManager>>,
    path: web::Path<String>,
    req: web::Json<IndexRequest>,
) -> ApiResult {
    let indexer = storage.index(&path)?;
    let indexed = indexer.index(&req.documents)?;
    Ok(HttpResponse::Ok().json(json!({ "indexed": indexed })))
}

async fn search(
    storage: web::Data<Arc<StorageManager>>,
    path: web::Path<String>,
    req: web::Json<SearchRequest>,
) -> ApiResult {
    let indexer = storage.index(&path)?;
    let results = indexer.search_batch(&req.queries, &req.parameters)?;
    Ok(HttpResponse::Ok().json(json!({ "results": results })))
}

async fn delete_documents(
    storage: web::Data<Arc<StorageManager>>,
    path: web::Path<String>,
    params: web::Json<DeleteParams>,
) -> ApiResult {
    let indexer = storage.index(&path)?;
    let deleted = indexer.delete(&params)?;
    Ok(HttpResponse::Ok().json(json!({ "deleted": deleted })))
}

async fn list_documents(
    storage: web::Data<Arc<StorageManager>>,
    path: web::Path<String>,
    params: Option<web::Json<ListParams>>,
) -> ApiResult {
    let indexer = storage.index(&path)?;
    let params = params.map(|p| p.into_inner()).unwrap_or_default();
    Ok(HttpResponse::Ok().json(json!({ "documents": indexer.list(&params)? })))
}

async fn filter_documents(
    storage: web::Data<Arc<StorageManager>>,
    path: web::Path<String>,
    params: web::Json<FilterParams>,
) -> ApiResult {
    let indexer = storage.index(&path)?;
    Ok(HttpResponse::Ok().json(json!({ "documents": indexer.filter(&params)? })))
}

async fn get_document(
    storage: web::Data<Arc<StorageManager>>,
    path: web::Path<(String, String)>,
) -> ApiResult {
    let (name, id) = path.into_inner();
    let indexer = storage.index(&name)?;
    Ok(HttpResponse::Ok().json(indexer.get(&id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;
    use serde_json::Value;

    fn storage() -> web::Data<Arc<StorageManager>> {
        web::Data::new(Arc::new(StorageManager::in_memory()))
    }

    fn config() -> Value {
        json!({
            "field_encodings": [
                {"encoder": "clip", "embedding_size": 2, "fields": ["image"]}
            ],
            "default_scores": [["query_image", "image", "clip", 1.0]]
        })
    }

    fn documents() -> Value {
        json!({
            "documents": {
                "clip": [
                    {"id": "0", "text": "red shoes", "tags": {"color": "red"}, "embeddings": {"image": [1.0, 0.0]}},
                    {"id": "1", "text": "blue hat", "tags": {"color": "blue"}, "embeddings": {"image": [0.0, 1.0]}}
                ]
            }
        })
    }

    #[actix_web::test]
    async fn test_index_search_list_delete() {
        let app = test::init_service(
            App::new().app_data(storage()).configure(RestApi::configure),
        )
        .await;

        let req = test::TestRequest::put().uri("/indexes/products").set_json(config()).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["mapping"]["properties"]["image-clip"]["properties"]["embedding"]["dims"], "2");

        let req = test::TestRequest::post().uri("/indexes/products/index").set_json(documents()).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["indexed"], 2);

        let search = json!({
            "queries": [{"fields": {"query_image": {"embeddings": {"clip": [0.0, 1.0]}}}}],
            "parameters": {"limit": 1, "get_score_breakdown": true}
        });
        let req = test::TestRequest::post().uri("/indexes/products/search").set_json(search).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let top = &body["results"][0][0];
        assert_eq!(top["id"], "1");
        assert!(top["scores"]["query_image-image-clip-1.0"].is_object());
        assert_eq!(body["results"][0].as_array().unwrap().len(), 1);

        let req = test::TestRequest::post().uri("/indexes/products/list").set_json(json!({"offset": 1})).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["documents"].as_array().unwrap().len(), 1);

        let req = test::TestRequest::post().uri("/indexes/products/delete").set_json(json!({"ids": ["0", "1"]})).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["deleted"], 2);

        let req = test::TestRequest::get().uri("/indexes/products").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["documents_count"], 0);
    }

    #[actix_web::test]
    async fn test_error_statuses() {
        let app = test::init_service(
            App::new().app_data(storage()).configure(RestApi::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/indexes/missing/mapping").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::put().uri("/indexes/products").set_json(config()).to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let bad_filter = json!({"filter": {"color": {"$regex": "r.*"}}});
        let req = test::TestRequest::post().uri("/indexes/products/filter").set_json(bad_filter).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("$regex"));

        let req = test::TestRequest::get().uri("/indexes/products/documents/nope").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let wrong_dims = json!({"documents": {"clip": [{"id": "x", "embeddings": {"image": [1.0]}}]}});
        let req = test::TestRequest::post().uri("/indexes/products/index").set_json(wrong_dims).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
