use rafka::prelude::{BrokerAddress, Error};
use std::env;
use std::panic::Location;

const RAFKA_ADDR: &str = "RAFKA_ADDR";

pub fn get_address() -> Result<(bool, BrokerAddress), Error> {
    let address = match env::var(RAFKA_ADDR) {
        Ok(address) => address.parse()?,
        Err(_) => {
            tracing::warn!("Skipping test because no {} is set", RAFKA_ADDR);
            return Ok((true, BrokerAddress::default()));
        }
    };
    Ok((false, address))
}

#[allow(dead_code)]
#[track_caller]
pub fn get_address_and_topic() -> Result<(bool, BrokerAddress, String), Error> {
    let caller_path = Location::caller().file();

    let (skip, address) = get_address()?;
    if skip {
        return Ok((skip, address, "".to_string()));
    }
    Ok((false, address, topic_from_file_path(caller_path)))
}

/// A consumer group nobody else uses, so every run starts from scratch.
#[allow(dead_code)]
pub fn unique_group(prefix: &str) -> String {
    format!("{prefix}-{:08x}", rand::random::<u32>())
}

#[allow(dead_code)]
fn topic_from_file_path(caller_path: &str) -> String {
    let file_name = std::path::Path::new(caller_path)
        .file_stem() // using `file_stem` to remove any extension
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("rafka");

    format!("{file_name}-integration")
}
