//! Bus-driven resolution runtime component.
//!
//! Each request runs on its own thread against a shared engine. Results are
//! published back on the bus with the request id they answer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, info, warn};
use tokio::sync::broadcast::{
    error::{RecvError, TryRecvError},
    Receiver, Sender,
};

use crate::cancellation::CancellationFlag;
use crate::config::Config;
use crate::error::ResolveError;
use crate::http::HttpTransport;
use crate::protocol::{ConfigMessage, Message, RequestId, ResolutionMessage, SeasonAnchor};
use crate::service::ReconciliationEngine;

type InFlight = Arc<Mutex<HashMap<RequestId, CancellationFlag>>>;

/// Serves resolution requests from the bus.
pub struct ResolutionManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    transport: Arc<dyn HttpTransport>,
    data_dir: Option<PathBuf>,
    engine: Arc<ReconciliationEngine>,
    in_flight: InFlight,
}

impl ResolutionManager {
    /// Creates a new manager bound to one bus receiver/sender pair.
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        config: Config,
        transport: Arc<dyn HttpTransport>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let engine = Arc::new(ReconciliationEngine::new(
            config,
            transport.clone(),
            data_dir.as_deref(),
        ));
        Self {
            bus_consumer,
            bus_producer,
            transport,
            data_dir,
            engine,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|held| held.len()).unwrap_or(0)
    }

    fn apply_config(&mut self, config: Config) {
        // In-flight requests finish on the engine they started with.
        info!("Resolution: rebuilding engine for updated configuration");
        self.engine = Arc::new(ReconciliationEngine::new(
            config,
            self.transport.clone(),
            self.data_dir.as_deref(),
        ));
    }

    fn cancel(&self, request_id: RequestId) {
        let Ok(held) = self.in_flight.lock() else {
            return;
        };
        match held.get(&request_id) {
            Some(flag) => {
                info!("Resolution[{request_id}]: cancelling");
                flag.cancel();
            }
            None => debug!("Resolution[{request_id}]: cancel for unknown request ignored"),
        }
    }

    fn register(&self, request_id: RequestId) -> CancellationFlag {
        let flag = CancellationFlag::new();
        if let Ok(mut held) = self.in_flight.lock() {
            if let Some(previous) = held.insert(request_id, flag.clone()) {
                warn!("Resolution[{request_id}]: id reused while in flight, cancelling the older request");
                previous.cancel();
            }
        }
        flag
    }

    /// Runs `work` on a worker thread and publishes whatever it returns.
    fn spawn_request<F>(&self, request_id: RequestId, work: F)
    where
        F: FnOnce(&ReconciliationEngine, &CancellationFlag) -> ResolutionMessage + Send + 'static,
    {
        let cancel = self.register(request_id);
        let engine = self.engine.clone();
        let bus_producer = self.bus_producer.clone();
        let in_flight = self.in_flight.clone();
        let spawned = thread::Builder::new()
            .name(format!("resolve-{request_id}"))
            .spawn(move || {
                let outcome = work(&engine, &cancel);
                if let Ok(mut held) = in_flight.lock() {
                    // A reused id may have replaced this request's flag.
                    let owned = held
                        .get(&request_id)
                        .is_some_and(|current| current.same_request(&cancel));
                    if owned {
                        held.remove(&request_id);
                    }
                }
                if bus_producer.send(Message::Resolution(outcome)).is_err() {
                    debug!("Resolution[{request_id}]: no subscribers for result");
                }
            });
        if let Err(error) = spawned {
            warn!("Resolution[{request_id}]: failed to start worker: {error}");
            if let Ok(mut held) = self.in_flight.lock() {
                held.remove(&request_id);
            }
            let _ = self.bus_producer.send(Message::Resolution(failure(
                request_id,
                format!("worker thread unavailable: {error}"),
                false,
            )));
        }
    }

    fn handle_resolution_message(&mut self, message: ResolutionMessage) {
        match message {
            ResolutionMessage::ResolveSeries { request_id, hint } => {
                debug!("Resolution[{request_id}]: series {}", hint.label());
                self.spawn_request(request_id, move |engine, cancel| {
                    match engine.resolve_series(&hint, cancel) {
                        Ok(record) => ResolutionMessage::SeriesResolved {
                            request_id,
                            record: Box::new(record),
                        },
                        Err(error) => failed(request_id, error),
                    }
                });
            }
            ResolutionMessage::ResolveSeason {
                request_id,
                anchor,
                season_number,
            } => {
                debug!("Resolution[{request_id}]: season {season_number} of {anchor:?}");
                self.spawn_request(request_id, move |engine, cancel| {
                    let root_id = match anchor {
                        SeasonAnchor::Root(root_id) => root_id,
                        SeasonAnchor::Hint(hint) => match engine.resolve_root_for_hint(&hint, cancel) {
                            Ok(root_id) => root_id,
                            Err(error) => return failed(request_id, error),
                        },
                    };
                    match engine.resolve_season(root_id, season_number, cancel) {
                        Ok(season) => ResolutionMessage::SeasonResolved {
                            request_id,
                            season: Box::new(season),
                        },
                        Err(error) => failed(request_id, error),
                    }
                });
            }
            ResolutionMessage::ResolveEpisode {
                request_id,
                series_id,
                season_number,
                episode_number,
            } => {
                debug!(
                    "Resolution[{request_id}]: episode S{season_number:02}E{episode_number:02} of {series_id}"
                );
                self.spawn_request(request_id, move |engine, cancel| {
                    match engine.resolve_episode(series_id, season_number, episode_number, cancel) {
                        Ok(episode) => ResolutionMessage::EpisodeResolved {
                            request_id,
                            episode: Box::new(episode),
                        },
                        Err(error) => failed(request_id, error),
                    }
                });
            }
            ResolutionMessage::Cancel(request_id) => self.cancel(request_id),
            ResolutionMessage::SeriesResolved { .. }
            | ResolutionMessage::SeasonResolved { .. }
            | ResolutionMessage::EpisodeResolved { .. }
            | ResolutionMessage::ResolutionFailed { .. } => {}
        }
    }

    fn handle_bus_message(&mut self, message: Message) {
        match message {
            Message::Resolution(message) => self.handle_resolution_message(message),
            Message::Config(ConfigMessage::ConfigChanged(config)) => self.apply_config(config),
        }
    }

    /// Starts the blocking event loop for resolution requests.
    pub fn run(&mut self) {
        loop {
            loop {
                match self.bus_consumer.try_recv() {
                    Ok(message) => self.handle_bus_message(message),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!("Resolution: bus lagged, {skipped} messages dropped");
                    }
                    Err(TryRecvError::Closed) => return,
                }
            }

            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_bus_message(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Resolution: bus lagged, {skipped} messages dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

fn failure(request_id: RequestId, error: String, cancelled: bool) -> ResolutionMessage {
    ResolutionMessage::ResolutionFailed {
        request_id,
        error,
        cancelled,
    }
}

fn failed(request_id: RequestId, error: ResolveError) -> ResolutionMessage {
    let cancelled = error == ResolveError::Cancelled;
    if cancelled {
        info!("Resolution[{request_id}]: cancelled");
    } else {
        warn!("Resolution[{request_id}]: {error}");
    }
    failure(request_id, error.to_string(), cancelled)
}
