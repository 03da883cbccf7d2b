use std::{
    panic::AssertUnwindSafe,
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread::JoinHandle,
    time::Instant,
};

use crate::{
    analytics_logger::AnalyticsLogger,
    completion::Completion,
    configuration::TargetConfiguration,
    context::ExternalState,
    engine::{Dispatcher, Engine},
    parameters::TargetParameters,
    request::{RawRequest, TargetPrefetch, TargetRequest},
    state::IdentityState,
    transport::{HttpRequest, HttpResponse, Transport},
    Error, Result,
};

/// Identifier addressed by a get or set command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Identifier {
    TntId,
    ThirdPartyId,
    SessionId,
}

/// Work for the worker thread. Commands are processed one at a time, in the order they were sent.
pub(crate) enum Command {
    Retrieve {
        requests: Vec<TargetRequest>,
        parameters: Option<TargetParameters>,
        external: ExternalState,
    },
    Prefetch {
        prefetches: Vec<TargetPrefetch>,
        parameters: Option<TargetParameters>,
        external: ExternalState,
        completion: Completion<Result<()>>,
    },
    Displayed {
        names: Vec<String>,
        parameters: Option<TargetParameters>,
        external: ExternalState,
    },
    Clicked {
        name: String,
        parameters: Option<TargetParameters>,
        external: ExternalState,
    },
    Raw {
        request: RawRequest,
        external: ExternalState,
        completion: Option<Completion<Result<serde_json::Value>>>,
    },
    Set(Identifier, Option<String>),
    Get(Identifier, mpsc::Sender<Option<String>>),
    ResetExperience,
    ClearPrefetchCache,
    UpdateConfiguration(TargetConfiguration),
    Completed {
        request_id: u64,
        result: Result<HttpResponse>,
    },
    Stop,
}

/// Runs each delivery call on its own network thread and posts the outcome back to the worker.
struct NetworkDispatcher {
    transport: Arc<dyn Transport + Send + Sync>,
    commands: mpsc::Sender<Command>,
}

impl Dispatcher for NetworkDispatcher {
    fn dispatch(&mut self, request_id: u64, request: HttpRequest) {
        let transport = Arc::clone(&self.transport);
        let commands = self.commands.clone();
        let spawned = std::thread::Builder::new()
            .name("target-network".to_owned())
            .spawn(move || {
                let result = transport.post(&request);
                // Error means the worker has exited and nobody is waiting for the result.
                let _ = commands.send(Command::Completed { request_id, result });
            });

        if let Err(err) = spawned {
            log::warn!(target: "target_delivery", request_id; "failed to spawn network thread: {:?}", err);
            let _ = self.commands.send(Command::Completed {
                request_id,
                result: Err(err.into()),
            });
        }
    }
}

/// The worker thread owning the delivery engine.
pub(crate) struct WorkerThread {
    join_handle: Option<JoinHandle<Result<()>>>,
    commands: mpsc::Sender<Command>,
}

impl WorkerThread {
    pub fn start(
        configuration: TargetConfiguration,
        identity: IdentityState,
        analytics_logger: Box<dyn AnalyticsLogger + Send + Sync>,
        transport: Arc<dyn Transport + Send + Sync>,
    ) -> Result<WorkerThread> {
        let (commands, receiver) = mpsc::channel::<Command>();

        let dispatcher = NetworkDispatcher {
            transport,
            commands: commands.clone(),
        };
        let engine = Engine::new(
            configuration,
            identity,
            analytics_logger,
            Box::new(dispatcher),
        );

        let join_handle = std::thread::Builder::new()
            .name("target-worker".to_owned())
            .spawn(move || {
                std::panic::catch_unwind(AssertUnwindSafe(move || run(engine, receiver))).map_err(
                    |_| {
                        log::error!(target: "target_delivery", "worker thread panicked");
                        Error::WorkerPanicked
                    },
                )
            })?;

        Ok(WorkerThread {
            join_handle: Some(join_handle),
            commands,
        })
    }

    /// Queue `command`. Fails if the worker has exited; the command is dropped, which delivers
    /// default content to any callback it carries.
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::WorkerStopped)
    }

    /// Ask the worker to stop without waiting for it.
    pub fn stop(&self) {
        // Error means the worker has already exited.
        let _ = self.commands.send(Command::Stop);
    }

    /// Stop the worker and block until it exits.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop();
        match self.join_handle.take() {
            Some(join_handle) => join_handle.join().map_err(|_| Error::WorkerPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut engine: Engine, commands: mpsc::Receiver<Command>) {
    log::debug!(target: "target_delivery", "worker thread started");
    loop {
        engine.expire_in_flight(Instant::now());

        let received = match engine.next_deadline() {
            Some(deadline) => {
                commands.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => commands
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };

        let command = match received {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!(target: "target_delivery", "command channel closed, stopping worker");
                return;
            }
        };

        if let Command::Stop = command {
            log::debug!(target: "target_delivery", "worker thread received stop command");
            // Dropping the engine delivers default content to requests still in flight.
            return;
        }
        handle(&mut engine, command);
    }
}

fn handle(engine: &mut Engine, command: Command) {
    match command {
        Command::Retrieve {
            requests,
            parameters,
            external,
        } => engine.retrieve_location_content(requests, parameters, external),
        Command::Prefetch {
            prefetches,
            parameters,
            external,
            completion,
        } => engine.prefetch_content(prefetches, parameters, external, completion),
        Command::Displayed {
            names,
            parameters,
            external,
        } => engine.locations_displayed(names, parameters, external),
        Command::Clicked {
            name,
            parameters,
            external,
        } => engine.location_clicked(name, parameters, external),
        Command::Raw {
            request,
            external,
            completion,
        } => engine.execute_raw_request(request, external, completion),
        Command::Set(identifier, value) => match identifier {
            Identifier::TntId => engine.set_tnt_id(value),
            Identifier::ThirdPartyId => engine.set_third_party_id(value),
            Identifier::SessionId => engine.set_session_id(value),
        },
        Command::Get(identifier, reply) => {
            let value = match identifier {
                Identifier::TntId => engine.tnt_id(),
                Identifier::ThirdPartyId => engine.third_party_id(),
                Identifier::SessionId => Some(engine.session_id()),
            };
            // Error means the caller stopped waiting.
            let _ = reply.send(value);
        }
        Command::ResetExperience => engine.reset_experience(),
        Command::ClearPrefetchCache => engine.clear_prefetch_cache(),
        Command::UpdateConfiguration(configuration) => engine.update_configuration(configuration),
        Command::Completed { request_id, result } => engine.handle_completion(request_id, result),
        Command::Stop => {}
    }
}
