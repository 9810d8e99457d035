//! Reference data cache — last fetched overview and selected-location stock.
//!
//! Snapshots are replaced whole when a response arrives, under one lock, so
//! racing pulls resolve as last-response-wins. A failed pull never clears data.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use stock_types::{
    event::SessionEvent,
    stock::{LocationStock, StockOverview},
    Result, StockError,
};

use crate::event_bus::EventBus;
use crate::ports::StockPort;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    pub overview: Option<StockOverview>,
    pub overview_refreshed_at: Option<DateTime<Utc>>,
    pub location_stock: Option<LocationStock>,
    pub location_refreshed_at: Option<DateTime<Utc>>,
    pub selected_location_id: Option<i64>,
}

pub struct ReferenceCache {
    stock: Arc<dyn StockPort>,
    state: Mutex<CacheSnapshot>,
    event_bus: EventBus,
}

impl ReferenceCache {
    pub fn new(stock: Arc<dyn StockPort>, event_bus: EventBus) -> Self {
        Self {
            stock,
            state: Mutex::new(CacheSnapshot::default()),
            event_bus,
        }
    }

    pub async fn pull_overview(&self) -> Result<StockOverview> {
        let overview = self.stock.fetch_overview().await.map_err(|e| {
            log::warn!("Overview refresh failed, keeping cached data: {}", e);
            e
        })?;
        {
            let mut state = self.lock();
            state.overview = Some(overview);
            state.overview_refreshed_at = Some(Utc::now());
        }
        self.event_bus.emit(SessionEvent::OverviewUpdated);
        Ok(overview)
    }

    /// Fetch one location's stock. On success it becomes the cached location
    /// and the selected location id.
    pub async fn pull_location_stock(&self, location_id: i64) -> Result<LocationStock> {
        let stock = self
            .stock
            .fetch_location_stock(location_id)
            .await
            .and_then(|stock| {
                if stock.location_id != location_id {
                    return Err(StockError::Parse(format!(
                        "requested location {} but response is for {}",
                        location_id, stock.location_id
                    )));
                }
                Ok(stock)
            })
            .map_err(|e| {
                log::warn!(
                    "Stock refresh for location {} failed, keeping cached data: {}",
                    location_id,
                    e
                );
                e
            })?;
        {
            let mut state = self.lock();
            state.location_stock = Some(stock.clone());
            state.location_refreshed_at = Some(Utc::now());
            state.selected_location_id = Some(location_id);
        }
        self.event_bus
            .emit(SessionEvent::LocationStockUpdated { location_id });
        Ok(stock)
    }

    /// Select a location and load it. Until the pull succeeds readers keep
    /// seeing the previous location's snapshot.
    pub async fn switch_location(&self, location_id: i64) -> Result<LocationStock> {
        let changed = {
            let mut state = self.lock();
            state.selected_location_id.replace(location_id) != Some(location_id)
        };
        if changed {
            self.event_bus
                .emit(SessionEvent::LocationSelected { location_id });
        }
        self.pull_location_stock(location_id).await
    }

    pub fn selected_location_id(&self) -> Option<i64> {
        self.lock().selected_location_id
    }

    pub fn overview(&self) -> Option<StockOverview> {
        self.lock().overview
    }

    pub fn location_stock(&self) -> Option<LocationStock> {
        self.lock().location_stock.clone()
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, CacheSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
