use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::basic::error::ModelError;
use crate::basic::powerflow::config::PowerFlowConfig;
use crate::basic::powerflow::result_extract::PowerFlowResult;
use crate::basic::system::Network;

/// Failure while loading or saving a case.
#[derive(Debug, Error)]
pub enum CaseFileError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Model(#[from] ModelError),
}

fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, CaseFileError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), CaseFileError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

/// Loads a network from a JSON case file and validates it.
pub fn read_network(path: impl AsRef<Path>) -> Result<Network, CaseFileError> {
    let net: Network = read_json(path)?;
    net.validate()?;
    Ok(net)
}

/// Parses and validates a network from a JSON string.
pub fn network_from_str(json: &str) -> Result<Network, CaseFileError> {
    let net: Network = serde_json::from_str(json)?;
    net.validate()?;
    Ok(net)
}

pub fn write_network(path: impl AsRef<Path>, net: &Network) -> Result<(), CaseFileError> {
    write_json(path, net)
}

pub fn write_result(path: impl AsRef<Path>, result: &PowerFlowResult) -> Result<(), CaseFileError> {
    write_json(path, result)
}

/// Loads a solver configuration; omitted fields keep their defaults.
pub fn read_config(path: impl AsRef<Path>) -> Result<PowerFlowConfig, CaseFileError> {
    let config: PowerFlowConfig = read_json(path)?;
    config.validate()?;
    Ok(config)
}
