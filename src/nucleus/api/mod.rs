pub mod query;
pub mod result;
pub mod query_exec;
pub mod pca_plot;
