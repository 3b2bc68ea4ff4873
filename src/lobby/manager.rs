//! Room registry: placement of joining sessions, per-IP room creation
//! limits, the per-room tick task, and disposal sweeps.

use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{ServerConfig, SimulationConfig};
use crate::lobby::room::Room;
use crate::metrics::Metrics;
use crate::net::dos_protection::{DosError, RoomCreateLimiter};

pub struct RoomManager {
    rooms: HashMap<Uuid, Arc<Mutex<Room>>>,
    create_limiter: RoomCreateLimiter,
    server_config: ServerConfig,
    sim_config: SimulationConfig,
    metrics: Arc<Metrics>,
}

impl RoomManager {
    pub fn new(
        server_config: ServerConfig,
        sim_config: SimulationConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            rooms: HashMap::new(),
            create_limiter: RoomCreateLimiter::new(server_config.room_create_max_per_min),
            server_config,
            sim_config,
            metrics,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn sim_config(&self) -> &SimulationConfig {
        &self.sim_config
    }

    /// Place a joining client: reuse a room with space, otherwise create a
    /// new one (counted against the client IP's creation budget).
    pub fn room_for_join(&mut self, ip: IpAddr) -> Result<Arc<Mutex<Room>>, DosError> {
        eprintln!("DBG room_for_join enter");
        if let Some(room) = self
            .rooms
            .values()
            .find(|room| room.lock().has_space())
        {
            eprintln!("DBG room_for_join reuse");
            return Ok(room.clone());
        }
        eprintln!("DBG room_for_join checking limiter");

        self.create_limiter.check(ip).map_err(|e| {
            Metrics::incr(&self.metrics.rooms_rate_limited);
            e
        })?;
        eprintln!("DBG room_for_join creating room");
        Ok(self.create_room())
    }

    fn create_room(&mut self) -> Arc<Mutex<Room>> {
        // Logged at creation so a room's spawn sequence can be replayed
        let id_seed = rand::random::<u64>();
        eprintln!("DBG create_room: Room::new enter");
        let room = Room::new(
            self.sim_config.clone(),
            self.server_config.max_clients,
            self.server_config.idle_timeout,
            self.metrics.clone(),
            id_seed,
        );
        eprintln!("DBG create_room: Room::new done");
        let id = room.id();
        let period = room.tick_period();
        let room = Arc::new(Mutex::new(room));
        self.rooms.insert(id, room.clone());
        info!(room = %id, seed = id_seed, rooms = self.rooms.len(), "room created");

        eprintln!("DBG create_room: spawning task");
        let _ = spawn_room_task(room.clone(), period);
        eprintln!("DBG create_room: spawned task, returning");
        room
    }

    /// Drop disposed rooms and expire stale limiter windows
    pub fn sweep(&mut self) {
        self.rooms.retain(|_, room| !room.lock().is_disposed());
        self.create_limiter.sweep();
    }

    /// Dispose every room (process shutdown)
    pub fn shutdown_all(&mut self) {
        for room in self.rooms.values() {
            room.lock().dispose();
        }
        self.rooms.clear();
    }
}

/// Drive one room's tick loop until it disposes.
///
/// A panic inside the tick is caught here: the room is disposed, its
/// subscribers get the offline status, and the fault never reaches other
/// rooms.
pub fn spawn_room_task(
    room: Arc<Mutex<Room>>,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                let mut room = room.lock();
                if room.should_dispose() {
                    room.dispose();
                }
                if room.is_disposed() {
                    return true;
                }
                room.tick_once();
                false
            }));

            match result {
                Ok(true) => break,
                Ok(false) => {}
                Err(_) => {
                    error!("tick panicked; disposing room");
                    room.lock().dispose();
                    break;
                }
            }
        }
    })
}
