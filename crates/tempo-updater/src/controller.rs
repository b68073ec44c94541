// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Update controllers: how one cycle is carried out
//!
//! A controller receives the scheduler's [`UpdateControls`] and decides
//! what to submit and when to wait. Couplings are always updated before any
//! component of the cycle is submitted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tempo_config::ConfigError;
use tracing::{trace, warn};

use crate::completion::{CompletionSignal, LatchCompletionSignal, PartFailure};
use crate::component::WorkspaceComponent;
use crate::error::{UpdaterError, UpdaterResult};

/// Outcome of one update cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub components: usize,
    pub parts: usize,
    pub failures: Vec<PartFailure>,
}

impl CycleReport {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }

    fn absorb(&mut self, other: CycleReport) {
        self.components += other.components;
        self.parts += other.parts;
        self.failures.extend(other.failures);
    }
}

/// Scheduler operations exposed to controllers
pub trait UpdateControls: Send + Sync {
    /// Snapshot of the registered components
    fn components(&self) -> Vec<Arc<dyn WorkspaceComponent>>;

    fn update_couplings(&self);

    /// Propagate only the couplings that feed `component`
    fn update_incoming_couplings(&self, component: &dyn WorkspaceComponent);

    /// Propagate only the couplings that read from `component`
    fn update_outgoing_couplings(&self, component: &dyn WorkspaceComponent);

    /// Parts the scheduler will submit for `component` (0 when disabled)
    fn scheduled_parts(&self, component: &dyn WorkspaceComponent) -> usize;

    /// Submit every scheduled part of `component`
    ///
    /// Each part signals `signal` exactly once. Parts that could not be
    /// submitted are signalled as failed before the error is returned.
    fn update_component(
        &self,
        component: &Arc<dyn WorkspaceComponent>,
        signal: &Arc<dyn CompletionSignal>,
    ) -> UpdaterResult<()>;

    /// Wait for `signal` to reach zero
    ///
    /// # Errors
    ///
    /// [`UpdaterError::CycleTimedOut`] when a cycle timeout is configured and
    /// expires; [`UpdaterError::CycleInterrupted`] when the updater shuts down.
    fn await_completion(&self, signal: &Arc<LatchCompletionSignal>) -> UpdaterResult<()>;

    /// Current cycle number
    fn time(&self) -> u64;
}

pub trait UpdateController: Send + Sync {
    /// Carry out one update cycle
    fn do_update(&self, controls: &dyn UpdateControls) -> UpdaterResult<CycleReport>;

    /// Display name, reported to listeners when the controller changes
    fn name(&self) -> &str;

    fn kind(&self) -> UpdateControllerKind {
        UpdateControllerKind::Custom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateControllerKind {
    Buffered,
    Priority,
    Custom,
}

impl UpdateControllerKind {
    /// Parse a configuration name (`buffered` or `priority`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "buffered" => Some(Self::Buffered),
            "priority" => Some(Self::Priority),
            _ => None,
        }
    }

    /// Build the built-in controller of this kind
    pub fn controller(self) -> Option<Arc<dyn UpdateController>> {
        match self {
            Self::Buffered => Some(Arc::new(BufferedUpdateController)),
            Self::Priority => Some(Arc::new(PriorityUpdateController)),
            Self::Custom => None,
        }
    }
}

impl fmt::Display for UpdateControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered => write!(f, "Buffered"),
            Self::Priority => write!(f, "Priority-based"),
            Self::Custom => write!(f, "Custom"),
        }
    }
}

/// Controller for a configuration name
pub fn controller_from_name(name: &str) -> UpdaterResult<Arc<dyn UpdateController>> {
    UpdateControllerKind::from_name(name)
        .and_then(UpdateControllerKind::controller)
        .ok_or_else(|| {
            UpdaterError::Config(ConfigError::InvalidValue(format!(
                "unknown update controller: {}",
                name
            )))
        })
}

/// Submit components and wait for all their parts on a single latch
fn update_all(
    controls: &dyn UpdateControls,
    components: &[Arc<dyn WorkspaceComponent>],
) -> UpdaterResult<CycleReport> {
    let parts: usize = components
        .iter()
        .map(|c| controls.scheduled_parts(c.as_ref()))
        .sum();
    let latch = Arc::new(LatchCompletionSignal::new(parts));
    let signal: Arc<dyn CompletionSignal> = latch.clone();

    for component in components {
        if let Err(e) = controls.update_component(component, &signal) {
            warn!("[UPDATER] Could not submit {}: {}", component.name(), e);
        }
    }

    controls.await_completion(&latch)?;
    Ok(CycleReport {
        components: components.len(),
        parts,
        failures: latch.failures(),
    })
}

/// Default controller: every component updates from the same prior state
///
/// Couplings run first, then all components are submitted at once and the
/// cycle waits for every part.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferedUpdateController;

impl UpdateController for BufferedUpdateController {
    fn do_update(&self, controls: &dyn UpdateControls) -> UpdaterResult<CycleReport> {
        let components = controls.components();
        if components.is_empty() {
            return Ok(CycleReport::default());
        }

        trace!("[UPDATER] Updating couplings at time {}", controls.time());
        controls.update_couplings();
        update_all(controls, &components)
    }

    fn name(&self) -> &str {
        "Buffered"
    }

    fn kind(&self) -> UpdateControllerKind {
        UpdateControllerKind::Buffered
    }
}

/// Updates components in ascending priority groups
///
/// Couplings run once per cycle. Each group completes before the next one
/// is submitted, so lower-priority components see this cycle's state of
/// higher-priority ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityUpdateController;

impl UpdateController for PriorityUpdateController {
    fn do_update(&self, controls: &dyn UpdateControls) -> UpdaterResult<CycleReport> {
        let components = controls.components();
        if components.is_empty() {
            return Ok(CycleReport::default());
        }

        controls.update_couplings();

        let mut groups: BTreeMap<i32, Vec<Arc<dyn WorkspaceComponent>>> = BTreeMap::new();
        for component in components {
            groups
                .entry(component.update_priority())
                .or_default()
                .push(component);
        }

        let mut report = CycleReport::default();
        for (priority, group) in groups {
            trace!(
                "[UPDATER] Priority group {} ({} components) at time {}",
                priority,
                group.len(),
                controls.time()
            );
            report.absorb(update_all(controls, &group)?);
        }
        Ok(report)
    }

    fn name(&self) -> &str {
        "Priority-based"
    }

    fn kind(&self) -> UpdateControllerKind {
        UpdateControllerKind::Priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentId, ComponentLock};
    use crate::error::ComponentError;
    use parking_lot::Mutex;

    struct Stub {
        id: ComponentId,
        lock: ComponentLock,
        priority: i32,
        enabled: bool,
        parts: usize,
    }

    impl WorkspaceComponent for Stub {
        fn id(&self) -> ComponentId {
            self.id
        }

        fn update(&self) -> Result<(), ComponentError> {
            Ok(())
        }

        fn update_part_count(&self) -> usize {
            self.parts
        }

        fn is_update_enabled(&self) -> bool {
            self.enabled
        }

        fn update_priority(&self) -> i32 {
            self.priority
        }

        fn lock(&self) -> &ComponentLock {
            &self.lock
        }
    }

    fn stub(id: u64, priority: i32) -> Arc<dyn WorkspaceComponent> {
        Arc::new(Stub {
            id: ComponentId(id),
            lock: ComponentLock::new(),
            priority,
            enabled: true,
            parts: 1,
        })
    }

    /// Runs parts inline and records the call sequence
    struct InlineControls {
        components: Vec<Arc<dyn WorkspaceComponent>>,
        calls: Mutex<Vec<String>>,
    }

    impl InlineControls {
        fn new(components: Vec<Arc<dyn WorkspaceComponent>>) -> Self {
            Self {
                components,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl UpdateControls for InlineControls {
        fn components(&self) -> Vec<Arc<dyn WorkspaceComponent>> {
            self.components.clone()
        }

        fn update_couplings(&self) {
            self.calls.lock().push("couplings".to_string());
        }

        fn update_incoming_couplings(&self, component: &dyn WorkspaceComponent) {
            self.calls.lock().push(format!("incoming {}", component.id().0));
        }

        fn update_outgoing_couplings(&self, component: &dyn WorkspaceComponent) {
            self.calls.lock().push(format!("outgoing {}", component.id().0));
        }

        fn scheduled_parts(&self, component: &dyn WorkspaceComponent) -> usize {
            if component.is_update_enabled() {
                component.update_part_count()
            } else {
                0
            }
        }

        fn update_component(
            &self,
            component: &Arc<dyn WorkspaceComponent>,
            signal: &Arc<dyn CompletionSignal>,
        ) -> UpdaterResult<()> {
            for _ in 0..self.scheduled_parts(component.as_ref()) {
                self.calls.lock().push(format!("update {}", component.id().0));
                signal.done();
            }
            Ok(())
        }

        fn await_completion(&self, signal: &Arc<LatchCompletionSignal>) -> UpdaterResult<()> {
            self.calls
                .lock()
                .push(format!("await {}", signal.latch().count()));
            Ok(())
        }

        fn time(&self) -> u64 {
            1
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(UpdateControllerKind::Buffered.to_string(), "Buffered");
        assert_eq!(UpdateControllerKind::Priority.to_string(), "Priority-based");
        assert_eq!(UpdateControllerKind::Custom.to_string(), "Custom");
        assert_eq!(
            UpdateControllerKind::from_name(" Priority "),
            Some(UpdateControllerKind::Priority)
        );
        assert_eq!(UpdateControllerKind::from_name("custom"), None);
    }

    #[test]
    fn test_controller_from_name() {
        assert_eq!(controller_from_name("buffered").unwrap().name(), "Buffered");
        assert!(matches!(
            controller_from_name("round-robin"),
            Err(UpdaterError::Config(ConfigError::InvalidValue(_)))
        ));
    }

    #[test]
    fn test_buffered_couplings_first_then_single_wait() {
        let controls = InlineControls::new(vec![stub(1, 0), stub(2, 0)]);
        let report = BufferedUpdateController.do_update(&controls).unwrap();

        assert_eq!(
            *controls.calls.lock(),
            vec!["couplings", "update 1", "update 2", "await 0"]
        );
        assert_eq!(report.components, 2);
        assert_eq!(report.parts, 2);
        assert!(!report.is_degraded());
    }

    #[test]
    fn test_empty_workspace_skips_couplings() {
        let controls = InlineControls::new(Vec::new());
        let report = BufferedUpdateController.do_update(&controls).unwrap();
        assert!(controls.calls.lock().is_empty());
        assert_eq!(report, CycleReport::default());
    }

    #[test]
    fn test_disabled_and_multi_part_sizing() {
        let disabled: Arc<dyn WorkspaceComponent> = Arc::new(Stub {
            id: ComponentId(1),
            lock: ComponentLock::new(),
            priority: 0,
            enabled: false,
            parts: 3,
        });
        let split: Arc<dyn WorkspaceComponent> = Arc::new(Stub {
            id: ComponentId(2),
            lock: ComponentLock::new(),
            priority: 0,
            enabled: true,
            parts: 3,
        });
        let controls = InlineControls::new(vec![disabled, split]);
        let report = BufferedUpdateController.do_update(&controls).unwrap();

        assert_eq!(report.parts, 3);
        assert_eq!(
            *controls.calls.lock(),
            vec!["couplings", "update 2", "update 2", "update 2", "await 0"]
        );
    }

    #[test]
    fn test_priority_groups_in_ascending_order() {
        let controls = InlineControls::new(vec![stub(1, 5), stub(2, -1), stub(3, 5)]);
        let report = PriorityUpdateController.do_update(&controls).unwrap();

        assert_eq!(
            *controls.calls.lock(),
            vec![
                "couplings",
                "update 2",
                "await 0",
                "update 1",
                "update 3",
                "await 0"
            ]
        );
        assert_eq!(report.components, 3);
        assert_eq!(PriorityUpdateController.kind(), UpdateControllerKind::Priority);
    }

    /// Updates one component at a time, moving only its own couplings
    struct OneByOne;

    impl UpdateController for OneByOne {
        fn do_update(&self, controls: &dyn UpdateControls) -> UpdaterResult<CycleReport> {
            let mut report = CycleReport::default();
            for component in controls.components() {
                controls.update_incoming_couplings(component.as_ref());
                report.absorb(update_all(controls, std::slice::from_ref(&component))?);
                controls.update_outgoing_couplings(component.as_ref());
            }
            Ok(report)
        }

        fn name(&self) -> &str {
            "One by one"
        }
    }

    #[test]
    fn test_custom_controller_moves_couplings_per_component() {
        let controls = InlineControls::new(vec![stub(1, 0), stub(2, 0)]);
        let report = OneByOne.do_update(&controls).unwrap();

        assert_eq!(
            *controls.calls.lock(),
            vec![
                "incoming 1",
                "update 1",
                "await 0",
                "outgoing 1",
                "incoming 2",
                "update 2",
                "await 0",
                "outgoing 2"
            ]
        );
        assert_eq!(report.parts, 2);
        assert_eq!(OneByOne.kind(), UpdateControllerKind::Custom);
    }
}
