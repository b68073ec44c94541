// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! # Tempo Workspace Updater
//!
//! Runs update cycles over a workspace of simulation components on a pool of
//! worker threads.
//!
//! ## Cycle
//! 1. Advance the time counter and sleep for the update delay
//! 2. Update couplings
//! 3. Submit every enabled component's update parts and wait for all of them
//! 4. Run UI events buffered during the cycle, under whole-workspace locks
//! 5. Notify listeners
//!
//! ## Threads
//! - `{prefix}-1..N`: update workers
//! - `{prefix}-driver`: runs cycles
//! - `{prefix}-events`: delivers listener notifications

pub mod completion;
pub mod component;
pub mod consistency;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod event_queue;
pub mod executor;
pub mod listener;
pub mod sync;
pub mod thread_pool;
pub mod update;
pub mod updater;

pub use completion::{
    CompletionSignal, CountDownLatch, LatchCompletionSignal, LatchWait, NoopCompletionSignal, PartFailure,
};
pub use component::{
    ComponentId, ComponentLock, ComponentRegistry, CouplingManager, NoCouplings, WorkspaceComponent,
};
pub use consistency::all_equal;
pub use controller::{
    controller_from_name, BufferedUpdateController, CycleReport, PriorityUpdateController, UpdateController,
    UpdateControllerKind, UpdateControls,
};
pub use dispatcher::{EventDispatcher, InvocationEvent, OtherEvent, ToolkitEvent};
pub use error::{ComponentError, UpdaterError, UpdaterResult};
pub use event_queue::{
    InterceptingEventQueue, NoActionSynchronizationManager, SynchronizingInvocationEvent,
    TaskSynchronizationManager,
};
pub use executor::{SerialExecutor, TaskHandle};
pub use listener::{
    ComponentUpdateEvent, ComponentUpdateListener, ListenerList, Notifier, WorkspaceUpdaterListener,
};
pub use sync::ComponentSynchronizer;
pub use thread_pool::{UpdateThread, UpdateThreadPool};
pub use update::ComponentUpdate;
pub use updater::{UpdaterSettings, WorkspaceUpdater};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
