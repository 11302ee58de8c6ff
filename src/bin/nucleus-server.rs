extern crate getopts;

use axum::{
    extract::{Path, Request, State}, http::{header, StatusCode},
    response::{IntoResponse, Response}, routing::{delete, get, post},
    Json, Router, ServiceExt
};

use tracing_subscriber::EnvFilter;
use tokio::fs::read;

use tower::layer::Layer;

use tower_http::normalize_path::NormalizePathLayer;
use tower_http::trace::TraceLayer;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use flexstr::{SharedStr as FlexStr, ToSharedStr};
use uuid::Uuid;

extern crate nucleus;

use std::collections::BTreeSet;
use std::{process, sync::Arc};

use getopts::Options;

use nucleus::api::pca_plot::PcaPlots;
use nucleus::api::query::{ExploreQuery, ExportQuery};
use nucleus::api::query_exec::QueryExec;
use nucleus::api::result::ExploreApiResult;
use nucleus::api::result::PlotPayload;
use nucleus::data_types::{AnalysisOutput, GeneCollection};
use nucleus::directory::{GeneCompleteMatch, GeneDirectory};
use nucleus::matrix::MatrixLoader;
use nucleus::normalize::NormalizationOptions;
use nucleus::site_db::SiteDB;
use nucleus::types::AnalysisId;
use nucleus::web::config::Config;

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

struct StaticFileState {
    web_root_dir: String,
}

struct AllState {
    query_exec: QueryExec,
    pca_plots: PcaPlots,
    static_file_state: StaticFileState,
}

async fn get_static_file(path: &str) -> Response {
    let res = read(path).await;

    let content_type = mime_guess::from_path(path).first_raw().unwrap_or("text/plain");

    match res {
        Ok(bytes) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type.to_string())], bytes).into_response()
        },
        Err(_) => {
            (StatusCode::NOT_FOUND, [(header::CONTENT_TYPE, "text/plain".to_string())], "not found".to_string()).into_response()
        }
    }
}

// If the path is a directory, return path+"/index.html".  Otherwise try
// the path, then default to loading the single page app from /index.html
async fn get_misc(Path(path): Path<String>,
                  State(all_state): State<Arc<AllState>>)
            -> Response
{
    let web_root_dir = &all_state.static_file_state.web_root_dir;

    let full_path = format!("{}/{}", web_root_dir, path);

    if std::path::Path::new(&full_path).is_dir() {
        let index_path = format!("{}/index.html", full_path);
        return get_static_file(&index_path).await;
    }

    if std::path::Path::new(&full_path).exists() {
        return get_static_file(&full_path).await;
    }

    let file_name = format!("{}/index.html", web_root_dir);
    get_static_file(&file_name).await
}

async fn get_index(State(all_state): State<Arc<AllState>>) -> Response {
    let web_root_dir = &all_state.static_file_state.web_root_dir;
    get_static_file(&format!("{}/index.html", web_root_dir)).await
}

#[derive(Serialize, Debug)]
struct GeneCompletionResponse {
    status: String,
    matches: Vec<GeneCompleteMatch>,
}

async fn gene_complete(Path(q): Path<String>, State(all_state): State<Arc<AllState>>)
                -> Json<GeneCompletionResponse>
{
    let matches = all_state.query_exec.get_directory().complete(&q);

    Json(GeneCompletionResponse {
        status: "Ok".to_owned(),
        matches,
    })
}

async fn get_analyses(State(all_state): State<Arc<AllState>>)
        -> Json<Vec<AnalysisOutput>>
{
    let mut analyses: Vec<AnalysisOutput> =
        all_state.query_exec.get_analyses().values().cloned().collect();

    analyses.sort_by_key(|analysis| analysis.id);

    Json(analyses)
}

async fn get_commercial_analyses(State(all_state): State<Arc<AllState>>)
        -> Json<Vec<AnalysisOutput>>
{
    let mut analyses: Vec<AnalysisOutput> =
        all_state.query_exec.get_analyses().values()
        .filter(|analysis| analysis.is_visible_in_commercial_app)
        .cloned()
        .collect();

    analyses.sort_by_key(|analysis| analysis.id);

    Json(analyses)
}

fn error_result(message: String) -> ExploreApiResult {
    ExploreApiResult {
        id: Uuid::new_v4().to_string().to_shared_str(),
        status: message.to_shared_str(),
        payload: PlotPayload::Empty,
        accessible_genes: vec![],
        denied_genes: vec![],
        added_genes: vec![],
        skipped_genes: vec![],
        applied_normalization: NormalizationOptions::identity(),
        usage_percentage: 0.0,
    }
}

async fn query_post(Path(analysis_id): Path<AnalysisId>,
                    State(all_state): State<Arc<AllState>>,
                    Json(q): Json<ExploreQuery>)
              -> Json<ExploreApiResult>
{
    match all_state.query_exec.explore(analysis_id, &q).await {
        Ok(result) => Json(result),
        Err(err) => Json(error_result(err.to_string())),
    }
}

async fn export_post(Path(analysis_id): Path<AnalysisId>,
                     State(all_state): State<Arc<AllState>>,
                     Json(q): Json<ExportQuery>)
               -> Response
{
    match all_state.query_exec.export_csv(analysis_id, &q).await {
        Ok(csv_text) => {
            let file_name = format!("analysis_{}_expression.csv", analysis_id);
            (StatusCode::OK,
             [(header::CONTENT_TYPE, "text/csv".to_string()),
              (header::CONTENT_DISPOSITION,
               format!("attachment; filename=\"{}\"", file_name))],
             csv_text).into_response()
        },
        Err(err) => {
            (StatusCode::BAD_REQUEST,
             [(header::CONTENT_TYPE, "text/plain".to_string())],
             err.to_string()).into_response()
        },
    }
}

async fn get_pca_projection(Path((analysis_id, dimensions)): Path<(AnalysisId, u8)>,
                            State(all_state): State<Arc<AllState>>)
        -> Result<Json<Value>, (StatusCode, String)>
{
    let Some(analysis) = all_state.query_exec.get_analyses().get(&analysis_id)
    else {
        return Err((StatusCode::NOT_FOUND,
                    format!("no analysis with id: {}", analysis_id)));
    };

    match all_state.pca_plots.pca_projection(analysis, dimensions).await {
        Ok(projection) => Ok(Json(projection)),
        Err(err) => {
            eprintln!("PCA projection error: {:?}", err);
            Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        },
    }
}

async fn get_user_genes(Path(user): Path<String>,
                        State(all_state): State<Arc<AllState>>)
        -> impl IntoResponse
{
    let user = user.to_shared_str();

    match all_state.query_exec.get_ledger().ensure_provisioned(&user) {
        Ok(provisioned) => Ok((StatusCode::OK, Json(provisioned))),
        Err(err) => {
            eprintln!("failed to provision {}: {}", user, err);
            Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        },
    }
}

async fn get_collections(Path(user): Path<String>,
                         State(all_state): State<Arc<AllState>>)
        -> Json<Vec<GeneCollection>>
{
    Json(all_state.query_exec.visible_collections(&user.to_shared_str()))
}

#[derive(Deserialize, Debug)]
struct CollectionUpsert {
    collection_name: FlexStr,
    #[serde(default)]
    description: FlexStr,
    #[serde(default)]
    gene_tokens: Vec<FlexStr>,
    #[serde(default)]
    linked_analyses: Vec<AnalysisId>,
    #[serde(default)]
    private_collection: bool,
    #[serde(default)]
    customer_visible: bool,
}

async fn collection_post(Path(user): Path<String>,
                         State(all_state): State<Arc<AllState>>,
                         Json(upsert): Json<CollectionUpsert>)
               -> Response
{
    let user = user.to_shared_str();
    let query_exec = &all_state.query_exec;

    if let Some(existing) = query_exec.collection(&upsert.collection_name) {
        if existing.created_by.as_ref() != Some(&user) {
            return (StatusCode::FORBIDDEN,
                    format!("collection owned by another user: {}",
                            upsert.collection_name)).into_response();
        }
    }

    let genes = match query_exec.resolve_selection(&upsert.gene_tokens) {
        Ok(genes) => genes,
        Err(report) => {
            return (StatusCode::BAD_REQUEST, report.to_string()).into_response();
        },
    };

    let collection = GeneCollection {
        collection_name: upsert.collection_name,
        description: upsert.description,
        created_by: Some(user),
        included_genes: genes.iter().map(|gene| gene.df_key()).collect(),
        linked_analyses: BTreeSet::from_iter(upsert.linked_analyses),
        private_collection: upsert.private_collection,
        customer_visible: upsert.customer_visible,
    };

    match query_exec.store_collection(&collection) {
        Ok(()) => (StatusCode::OK, Json(collection)).into_response(),
        Err(err) => {
            eprintln!("failed to store collection: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        },
    }
}

async fn collection_delete(Path((user, collection_name)): Path<(String, String)>,
                           State(all_state): State<Arc<AllState>>)
               -> Response
{
    let user = user.to_shared_str();
    let collection_name = collection_name.to_shared_str();
    let query_exec = &all_state.query_exec;

    let Some(existing) = query_exec.collection(&collection_name)
    else {
        return (StatusCode::NOT_FOUND,
                format!("no collection named: {}", collection_name)).into_response();
    };

    if existing.created_by.as_ref() != Some(&user) {
        return (StatusCode::FORBIDDEN,
                format!("collection owned by another user: {}",
                        collection_name)).into_response();
    }

    match query_exec.delete_collection(&collection_name) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            eprintln!("failed to delete collection: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        },
    }
}

async fn ping() -> String {
    String::from("OK") + " " + PKG_NAME + " " + VERSION
}

async fn not_found() -> Json<Value> {
    json!({
        "status": "error",
        "reason": "Resource was not found."
    }).into()
}

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

#[tokio::main]
async fn main() {
    println!("{} v{}", PKG_NAME, VERSION);

    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options::new();

    opts.optflag("h", "help", "print this help message");
    opts.optopt("c", "config-file", "Configuration file name", "CONFIG");
    opts.optopt("d", "site-db", "SQLite3 site database", "SITE_DB");
    opts.optopt("b", "bind-address-and-port", "The address:port to bind to", "BIND_ADDRESS_AND_PORT");
    opts.optopt("w", "web-root-dir", "Root web data directory", "WEB_ROOT_DIR");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => panic!("Invalid options\n{}", f)
    };

    let program = args[0].clone();

    if matches.opt_present("help") {
        print_usage(&program, opts);
        process::exit(0);
    }
    if !matches.opt_present("config-file") {
        println!("no -c|--config-file option");
        print_usage(&program, opts);
        process::exit(1);
    }
    if !matches.opt_present("site-db") {
        println!("no -d|--site-db option");
        print_usage(&program, opts);
        process::exit(1);
    }
    if !matches.opt_present("web-root-dir") {
        println!("no -w|--web-root-dir option");
        print_usage(&program, opts);
        process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("nucleus_bulk_rna_json=warn,tower_http=warn"))
                .unwrap(),
        )
        .init();

    let bind_address_and_port = matches.opt_str("bind-address-and-port");
    let listener =
        if let Some(bind_address_and_port) = bind_address_and_port {
           tokio::net::TcpListener::bind(bind_address_and_port).await.unwrap()
        } else {
           tokio::net::TcpListener::bind("0.0.0.0:8500").await.unwrap()
        };

    let config_file_name = matches.opt_str("c").unwrap();
    let config = Config::read(&config_file_name);

    let site_db_path = matches.opt_str("d").unwrap();
    let site_db = match SiteDB::new(&site_db_path) {
        Ok(site_db) => Arc::new(site_db),
        Err(err) => panic!("failed to open site db: {}", err),
    };

    let genes = match site_db.load_genes() {
        Ok(genes) => genes,
        Err(err) => panic!("failed to load genes from site db: {}", err),
    };

    println!("{} gene records loaded", genes.len());

    let directory = Arc::new(GeneDirectory::new(genes));
    let matrix_loader = MatrixLoader::new(&config.server.data_dir,
                                          config.server.object_store_url.as_deref());

    let query_exec = match QueryExec::new(directory, site_db, matrix_loader) {
        Ok(query_exec) => query_exec,
        Err(err) => panic!("failed to initialise query executor: {}", err),
    };

    let pca_plots = PcaPlots::new(&config);

    let web_root_dir = matches.opt_str("w").unwrap();
    let static_file_state = StaticFileState {
        web_root_dir,
    };

    let all_state = AllState {
        query_exec,
        pca_plots,
        static_file_state,
    };

    println!("Starting server ...");
    let app = Router::new()
        .route("/{*path}", get(get_misc))
        .route("/", get(get_index))
        .route("/api/v1/analyses", get(get_analyses))
        .route("/api/v1/analyses/commercial", get(get_commercial_analyses))
        .route("/api/v1/complete/gene/{q}", get(gene_complete))
        .route("/api/v1/analysis/{id}/query", post(query_post))
        .route("/api/v1/analysis/{id}/export", post(export_post))
        .route("/api/v1/analysis/{id}/pca/{dimensions}", get(get_pca_projection))
        .route("/api/v1/user/{user}/genes", get(get_user_genes))
        .route("/api/v1/collections/{user}", get(get_collections).post(collection_post))
        .route("/api/v1/collections/{user}/{collection_name}", delete(collection_delete))
        .route("/ping", get(ping))
        .fallback(not_found)
        .with_state(Arc::new(all_state))
        .layer(TraceLayer::new_for_http());

    let app = NormalizePathLayer::trim_trailing_slash().layer(app);

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .await
        .unwrap();
}
