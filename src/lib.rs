pub mod audit;
pub mod calibration;
pub mod corpus;
pub mod dataset;
pub mod error;
pub mod features;
pub mod history;
pub mod http_client;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod oracle;
pub mod pipeline;
pub mod predictions;
pub mod profile;
pub mod retrain;
pub mod schema;
pub mod settings;
pub mod source;
