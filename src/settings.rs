use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_MODEL_PATH: &str = "models/oracle_bundle.json";
const DEFAULT_SOURCE_URL: &str = "http://127.0.0.1:8700";

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub corpus_db: PathBuf,
    pub predictions_db: PathBuf,
    pub model_path: PathBuf,
    pub source_url: String,
    pub batch_size: usize,
    pub request_delay: Duration,
    pub fetch_retries: u32,
    pub request_timeout: Duration,
    pub seed: u64,
    pub eval_fraction: f64,
    pub refresh_fighters: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        Self::from_current_env()
    }

    pub fn from_current_env() -> Self {
        let data_dir = env_path("ORACLE_DATA_DIR").unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let corpus_db =
            env_path("ORACLE_CORPUS_DB").unwrap_or_else(|| data_dir.join("corpus.sqlite"));
        let predictions_db = env_path("ORACLE_PREDICTIONS_DB")
            .or_else(|| env_path("DATABASE_URL").map(strip_sqlite_scheme))
            .unwrap_or_else(|| data_dir.join("predictions.sqlite"));
        let model_path =
            env_path("ORACLE_MODEL_PATH").unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));
        let source_url = env::var("ORACLE_SOURCE_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string());

        let batch_size = env_parse::<usize>("ORACLE_BATCH_SIZE")
            .unwrap_or(50)
            .clamp(1, 1000);
        let request_delay_ms = env_parse::<u64>("ORACLE_REQUEST_DELAY_MS")
            .unwrap_or(100)
            .min(60_000);
        let fetch_retries = env_parse::<u32>("ORACLE_FETCH_RETRIES")
            .unwrap_or(2)
            .min(8);
        let request_timeout_secs = env_parse::<u64>("ORACLE_REQUEST_TIMEOUT_SECS")
            .unwrap_or(10)
            .clamp(1, 300);
        let seed = env_parse::<u64>("ORACLE_SEED").unwrap_or(42);
        let eval_fraction = env_parse::<f64>("ORACLE_EVAL_FRACTION")
            .filter(|v| v.is_finite())
            .unwrap_or(0.2)
            .clamp(0.05, 0.5);

        Self {
            data_dir,
            corpus_db,
            predictions_db,
            model_path,
            source_url,
            batch_size,
            request_delay: Duration::from_millis(request_delay_ms),
            fetch_retries,
            request_timeout: Duration::from_secs(request_timeout_secs),
            seed,
            eval_fraction,
            refresh_fighters: env_bool("ORACLE_REFRESH_FIGHTERS", false),
        }
    }

    pub fn pipeline_lock_path(&self) -> PathBuf {
        self.data_dir.join("pipeline.lock")
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| {
            let t = v.trim().to_ascii_lowercase();
            !(t.is_empty() || t == "0" || t == "false" || t == "off" || t == "no")
        })
        .unwrap_or(default)
}

fn strip_sqlite_scheme(path: PathBuf) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.strip_prefix("sqlite:///") {
        Some(rest) => PathBuf::from(rest),
        None => path,
    }
}
