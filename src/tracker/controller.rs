use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use log::info;
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::db::{
    connection::Database,
    models::{PositionReading, Zone},
};
use crate::geometry::ZoneGeometry;

use super::worker::{vehicle_worker, TrackerCommand};

const WORKER_QUEUE_CAPACITY: usize = 256;

struct WorkerHandle {
    sender: mpsc::Sender<TrackerCommand>,
    task: JoinHandle<()>,
}

/// Routes readings and zone notifications to per-vehicle worker tasks.
/// Workers are spawned lazily on the first command for a vehicle and live
/// until shutdown; distinct vehicles process concurrently while each
/// vehicle's commands stay strictly ordered.
#[derive(Clone)]
pub struct TrackerController {
    db: Database,
    geometry: Arc<dyn ZoneGeometry>,
    workers: Arc<Mutex<HashMap<i64, WorkerHandle>>>,
    cancel: CancellationToken,
}

impl TrackerController {
    pub fn new(db: Database, geometry: Arc<dyn ZoneGeometry>) -> Self {
        Self {
            db,
            geometry,
            workers: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn record_reading(&self, reading: PositionReading) -> Result<()> {
        let sender = self.sender_for(reading.vehicle_id).await;
        sender
            .send(TrackerCommand::Reading(reading))
            .await
            .map_err(|_| anyhow!("tracker worker queue closed"))
    }

    /// Fan the zone-creation backfill out to every vehicle of the zone's
    /// customer, through the same queues live readings use.
    pub async fn zone_created(&self, zone: &Zone) -> Result<()> {
        let vehicles = self.db.vehicles_for_customer(zone.customer_id).await?;
        info!(
            "backfilling zone {} against {} vehicles of customer {}",
            zone.id,
            vehicles.len(),
            zone.customer_id
        );

        for vehicle in vehicles {
            let sender = self.sender_for(vehicle.id).await;
            sender
                .send(TrackerCommand::ZoneBackfill { zone_id: zone.id })
                .await
                .map_err(|_| anyhow!("tracker worker queue closed"))?;
        }
        Ok(())
    }

    /// Wait until every queued command has been applied.
    pub async fn flush(&self) -> Result<()> {
        let senders: Vec<mpsc::Sender<TrackerCommand>> = {
            let workers = self.workers.lock().await;
            workers.values().map(|w| w.sender.clone()).collect()
        };

        for sender in senders {
            let (ack_tx, ack_rx) = oneshot::channel();
            if sender.send(TrackerCommand::Flush(ack_tx)).await.is_ok() {
                ack_rx
                    .await
                    .map_err(|_| anyhow!("tracker worker dropped flush ack"))?;
            }
        }
        Ok(())
    }

    /// Drain queues, stop all workers and wait for them to exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.flush().await?;
        self.cancel.cancel();

        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock().await;
            workers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.task.await;
        }
        Ok(())
    }

    async fn sender_for(&self, vehicle_id: i64) -> mpsc::Sender<TrackerCommand> {
        let mut workers = self.workers.lock().await;
        if let Some(handle) = workers.get(&vehicle_id) {
            return handle.sender.clone();
        }

        let (sender, receiver) = mpsc::channel(WORKER_QUEUE_CAPACITY);
        let task = tokio::spawn(vehicle_worker(
            vehicle_id,
            self.db.clone(),
            self.geometry.clone(),
            receiver,
            self.cancel.child_token(),
        ));
        workers.insert(
            vehicle_id,
            WorkerHandle {
                sender: sender.clone(),
                task,
            },
        );
        sender
    }
}
