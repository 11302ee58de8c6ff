extern crate regex;
extern crate chrono;
extern crate serde_json;
extern crate reqwest;
extern crate flate2;
#[macro_use] extern crate lazy_static;
#[macro_use] extern crate serde_derive;
extern crate uuid;

pub mod types;
pub mod data_types;
pub mod directory;
pub mod annotation;
pub mod tier;
pub mod site_db;
pub mod ledger;
pub mod matrix;
pub mod normalize;
pub mod conditions;
pub mod api;
pub mod web;
