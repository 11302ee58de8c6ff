extern crate nucleus;

use std::collections::BTreeSet;
use std::error::Error;
use std::env;
use std::fs::File;
use std::io::{BufReader, Read};
use std::process;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flexstr::SharedStr as FlexStr;
use serde::Deserialize;

use getopts::Options;
use getopts::ParsingStyle;

use nucleus::annotation::read_annotation_file;
use nucleus::data_types::{AnalysisOutput, GeneCollection, Tier};
use nucleus::matrix::parse_matrix;
use nucleus::site_db::SiteDB;
use nucleus::types::{AnalysisId, ReplicateColumn, UserId};
use nucleus::web::config::Config;

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options] [action] [file_name]", program);
    print!("{}", opts.usage(&brief));
}

fn read_json_file<T: for<'de> Deserialize<'de>>(file_name: &str) -> T {
    let file = match File::open(file_name) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to read {}: {}", file_name, err);
            process::exit(1);
        }
    };

    let mut reader = BufReader::new(file);

    let mut decoded_json = String::new();
    reader.read_to_string(&mut decoded_json).unwrap();
    let serde_result = serde_json::from_str(&decoded_json);

    match serde_result {
        Ok(results) => results,
        Err(err) => {
            eprint!("failed to parse {}: {}", file_name, err);
            process::exit(1);
        },
    }
}

#[derive(Deserialize, Debug)]
struct CollectionDescriptor {
    collection_name: FlexStr,
    #[serde(default)]
    description: FlexStr,
    #[serde(default)]
    created_by: Option<UserId>,
    included_genes: BTreeSet<FlexStr>,
    #[serde(default)]
    linked_analyses: BTreeSet<AnalysisId>,
    #[serde(default)]
    private_collection: bool,
    #[serde(default)]
    customer_visible: bool,
}

#[derive(Deserialize, Debug)]
struct AnalysisDescriptor {
    id: AnalysisId,
    #[serde(default)]
    project: Option<FlexStr>,
    #[serde(default)]
    product: Option<FlexStr>,
    #[serde(default)]
    description: Option<FlexStr>,
    #[serde(default)]
    origin: Option<FlexStr>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    is_visible_in_commercial_app: bool,
    file_path: FlexStr,
    // filled in from the matrix header when not given explicitly
    #[serde(default)]
    conditions: Vec<ReplicateColumn>,
}

fn read_matrix_columns(config: &Config, file_path: &str)
    -> Result<Vec<ReplicateColumn>, Box<dyn Error>>
{
    let full_path = format!("{}/{}", config.server.data_dir, file_path);

    let file = File::open(&full_path)?;

    let mut text = String::new();
    if full_path.ends_with(".gz") {
        GzDecoder::new(file).read_to_string(&mut text)?;
    } else {
        BufReader::new(file).read_to_string(&mut text)?;
    }

    let matrix = parse_matrix(&text)?;

    Ok(matrix.columns().to_vec())
}

fn load_genes(site_db: &SiteDB, file_name: &str) -> Result<(), Box<dyn Error>> {
    let genes = read_annotation_file(file_name)?;

    println!("storing {} gene records", genes.len());

    site_db.store_genes(&genes)?;

    Ok(())
}

fn load_tiers(site_db: &SiteDB, config: &Config) -> Result<(), Box<dyn Error>> {
    if config.tiers.is_empty() {
        eprintln!("no tiers in the configuration file");
        process::exit(1);
    }

    for tier_config in &config.tiers {
        let tier = Tier {
            name: tier_config.name.clone(),
            description: tier_config.description.clone(),
            max_genes: tier_config.max_genes,
        };

        println!("storing tier {} (max genes: {})", tier.name, tier.max_genes);

        site_db.store_tier(&tier)?;
    }

    Ok(())
}

fn load_collections(site_db: &SiteDB, file_name: &str) -> Result<(), Box<dyn Error>> {
    let descriptors: Vec<CollectionDescriptor> = read_json_file(file_name);

    for descriptor in descriptors {
        let collection = GeneCollection {
            collection_name: descriptor.collection_name,
            description: descriptor.description,
            created_by: descriptor.created_by,
            included_genes: descriptor.included_genes,
            linked_analyses: descriptor.linked_analyses,
            private_collection: descriptor.private_collection,
            customer_visible: descriptor.customer_visible,
        };

        println!("storing collection {} ({} genes)",
                 collection.collection_name, collection.included_genes.len());

        site_db.store_collection(&collection)?;
    }

    Ok(())
}

fn load_analyses(site_db: &SiteDB, config: &Config, file_name: &str)
    -> Result<(), Box<dyn Error>>
{
    let descriptors: Vec<AnalysisDescriptor> = read_json_file(file_name);

    for descriptor in descriptors {
        let conditions =
            if descriptor.conditions.is_empty() {
                if descriptor.file_path.starts_with("s3://") {
                    eprintln!("analysis {} is remote and needs an explicit conditions list",
                              descriptor.id);
                    process::exit(1);
                }
                read_matrix_columns(config, &descriptor.file_path)?
            } else {
                descriptor.conditions
            };

        let analysis = AnalysisOutput {
            id: descriptor.id,
            project: descriptor.project,
            product: descriptor.product,
            description: descriptor.description,
            origin: descriptor.origin,
            created_at: descriptor.created_at.unwrap_or_else(Utc::now),
            is_visible_in_commercial_app: descriptor.is_visible_in_commercial_app,
            file_path: descriptor.file_path,
            conditions,
        };

        println!("storing analysis {} ({} replicate columns)",
                 analysis.id, analysis.conditions.len());

        site_db.store_analysis(&analysis)?;
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("Loading using {} v{}", PKG_NAME, VERSION);

    let args: Vec<String> = env::args().collect();
    let mut opts = Options::new();
    let opts = opts.parsing_style(ParsingStyle::StopAtFirstFree);

    opts.optflag("h", "help", "print this help message");
    opts.optopt("c", "config-file", "Configuration file name", "CONFIG");
    opts.optopt("d", "site-db", "SQLite3 site database", "SITE_DB");

    let program = args[0].clone();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            print_usage(&program, opts);
            println!("\nerror: {}", e);
            process::exit(0);
        }
    };

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

    let mut remaining_args = matches.free.clone();

    if remaining_args.is_empty() {
        println!("needs an [action] argument: genes, tiers, collections or analyses");
        print_usage(&program, opts);
        process::exit(1);
    }

    let action = remaining_args.remove(0);

    let config_file_name = matches.opt_str("c").unwrap();
    let config = Config::read(&config_file_name);

    let site_db_path = matches.opt_str("d").unwrap();
    let site_db = SiteDB::new(&site_db_path)?;

    match action.as_str() {
        "genes" | "tiers" | "collections" | "analyses" => (),
        _ => {
            println!("unknown action {}", action);
            print_usage(&program, opts);
            process::exit(1);
        },
    }

    if action != "tiers" && remaining_args.is_empty() {
        println!("{} needs a [file_name] argument", action);
        print_usage(&program, opts);
        process::exit(1);
    }

    match action.as_str() {
        "genes" => load_genes(&site_db, &remaining_args[0])?,
        "tiers" => load_tiers(&site_db, &config)?,
        "collections" => load_collections(&site_db, &remaining_args[0])?,
        "analyses" => load_analyses(&site_db, &config, &remaining_args[0])?,
        _ => unreachable!(),
    }

    Ok(())
}
