//! Remote compute (station) boundary. Workers on API-only models may be
//! offloaded to a station; without a provider every room runs locally.

use serde::Serialize;

use qr_domain::{Error, Result};

#[derive(Clone, Debug, Serialize)]
pub struct Station {
    pub id: String,
    pub host: String,
    pub busy: bool,
}

#[async_trait::async_trait]
pub trait StationProvider: Send + Sync {
    async fn provision(&self, room_id: i64) -> Result<Station>;

    async fn release(&self, station_id: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<Station>>;
}

pub struct NoopStations;

#[async_trait::async_trait]
impl StationProvider for NoopStations {
    async fn provision(&self, _room_id: i64) -> Result<Station> {
        Err(Error::invalid_state("no station provider configured"))
    }

    async fn release(&self, _station_id: &str) -> Result<()> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Station>> {
        Ok(Vec::new())
    }
}
