pub mod csse; // JHU CSSE global time series (confirmed + deaths)

pub use csse::{decode_table, fetch_table, http_source, CsseClient, DataSourceError, SeriesSource};
