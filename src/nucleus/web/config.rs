use std::fs::File;
use std::io::BufReader;

use flexstr::SharedStr as FlexStr;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServerConfig {
    // directory that local matrix source references are resolved against
    pub data_dir: String,
    // HTTP gateway that "s3://bucket/key" locators are fetched through
    #[serde(skip_serializing_if="Option::is_none")]
    pub object_store_url: Option<String>,
    // external service that renders PCA projections
    #[serde(skip_serializing_if="Option::is_none")]
    pub stats_service_url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TierConfig {
    pub name: FlexStr,
    #[serde(skip_serializing_if="Option::is_none")]
    pub description: Option<FlexStr>,
    pub max_genes: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(skip_serializing_if="Vec::is_empty", default)]
    pub tiers: Vec<TierConfig>,
}

impl Config {
    pub fn read(config_file_name: &str) -> Config {
        let file = match File::open(config_file_name) {
            Ok(file) => file,
            Err(err) => {
                panic!("Failed to read {}: {}\n", config_file_name, err)
            }
        };
        let reader = BufReader::new(file);

        match serde_json::from_reader(reader) {
            Ok(config) => config,
            Err(err) => {
                panic!("failed to parse {}: {}", config_file_name, err)
            },
        }
    }
}
