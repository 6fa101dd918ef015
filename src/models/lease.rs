//! Model leases
//!
//! A lease binds one loaded capability to one turn. Releasing drops the
//! weights and asks the provider to reclaim device memory; it runs at most
//! once per lease and also runs from `Drop`, so early returns, `?` and
//! unwinding all go through it.

use super::catalog::ModelCatalog;
use super::device::{resolve_device, Device, DeviceProbe};
use super::{
    Capability, CausalLm, LoadedModel, ModelProvider, SpeechRecognizer, VoiceSynthesizer,
};
use crate::{NeuroChatError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type LeaseId = Uuid;

#[derive(Debug, Clone)]
struct LeaseRecord {
    capability: Capability,
    identifier: String,
    turn: Option<Uuid>,
}

#[derive(Debug, Default)]
struct Ledger {
    outstanding: HashMap<LeaseId, LeaseRecord>,
    acquired: usize,
    released: usize,
}

/// Lifetime counters across all leases issued by a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaseStats {
    pub acquired: usize,
    pub released: usize,
    pub outstanding: usize,
}

/// Issues leases against a catalog and a provider
#[derive(Clone)]
pub struct ModelManager {
    catalog: Arc<ModelCatalog>,
    provider: Arc<dyn ModelProvider>,
    probe: Arc<dyn DeviceProbe>,
    ledger: Arc<Mutex<Ledger>>,
}

impl ModelManager {
    pub fn new(
        catalog: ModelCatalog,
        provider: Arc<dyn ModelProvider>,
        probe: Arc<dyn DeviceProbe>,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            provider,
            probe,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Load `identifier` as `capability` outside of any turn
    pub fn acquire(&self, capability: Capability, identifier: &str) -> Result<ModelLease> {
        self.acquire_inner(capability, identifier, None)
    }

    /// Release a lease that may be absent. Repeated calls are harmless.
    pub fn release(&self, lease: Option<ModelLease>) {
        if let Some(mut lease) = lease {
            lease.release();
        }
    }

    /// Open a scoped acquisition block for one turn
    pub fn begin_turn(&self) -> TurnScope {
        let scope = TurnScope {
            id: Uuid::new_v4(),
            manager: self.clone(),
            leases: Vec::new(),
        };
        debug!("Turn scope {} opened", scope.id);
        scope
    }

    pub fn outstanding(&self) -> usize {
        self.ledger.lock().outstanding.len()
    }

    pub fn outstanding_for_turn(&self, turn: Uuid) -> usize {
        self.ledger
            .lock()
            .outstanding
            .values()
            .filter(|record| record.turn == Some(turn))
            .count()
    }

    fn outstanding_records(&self, turn: Uuid) -> Vec<LeaseRecord> {
        self.ledger
            .lock()
            .outstanding
            .values()
            .filter(|record| record.turn == Some(turn))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> LeaseStats {
        let ledger = self.ledger.lock();
        LeaseStats {
            acquired: ledger.acquired,
            released: ledger.released,
            outstanding: ledger.outstanding.len(),
        }
    }

    fn acquire_inner(
        &self,
        capability: Capability,
        identifier: &str,
        turn: Option<Uuid>,
    ) -> Result<ModelLease> {
        let entry = self.catalog.locate(capability, identifier)?;
        let device = resolve_device(self.probe.as_ref());

        info!("Loading {} model {:?} on {}", capability, identifier, device);
        let started = Instant::now();

        let model = match self.provider.load(&entry, device) {
            Ok(model) => model,
            Err(e) => {
                // Partial allocations from the failed load
                self.provider.reclaim(capability, device);
                return Err(match e {
                    NeuroChatError::ModelNotFound(_) | NeuroChatError::ModelLoadError(_) => e,
                    other => NeuroChatError::ModelLoadError(format!(
                        "Failed to load {} model {:?}: {}",
                        capability, identifier, other
                    )),
                });
            }
        };

        if model.capability() != capability {
            let loaded = model.capability();
            drop(model);
            self.provider.reclaim(capability, device);
            return Err(NeuroChatError::ModelLoadError(format!(
                "Model {:?} loaded as {} but {} was requested",
                identifier, loaded, capability
            )));
        }

        let id = Uuid::new_v4();
        {
            let mut ledger = self.ledger.lock();
            ledger.acquired += 1;
            ledger.outstanding.insert(
                id,
                LeaseRecord {
                    capability,
                    identifier: identifier.to_string(),
                    turn,
                },
            );
        }

        info!(
            "Loaded {} model {:?} on {} in {}ms (lease {})",
            capability,
            identifier,
            device,
            started.elapsed().as_millis(),
            id
        );

        Ok(ModelLease {
            id,
            capability,
            identifier: identifier.to_string(),
            device,
            model: Some(model),
            released: false,
            provider: Arc::clone(&self.provider),
            ledger: Arc::clone(&self.ledger),
        })
    }
}

/// A loaded model bound to a device until released
pub struct ModelLease {
    id: LeaseId,
    capability: Capability,
    identifier: String,
    device: Device,
    model: Option<LoadedModel>,
    released: bool,
    provider: Arc<dyn ModelProvider>,
    ledger: Arc<Mutex<Ledger>>,
}

impl ModelLease {
    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn text_model(&mut self) -> Result<&mut dyn CausalLm> {
        match self.model.as_mut() {
            Some(LoadedModel::TextGeneration(model)) => Ok(&mut **model),
            _ => Err(unavailable(
                self.id,
                &self.identifier,
                self.released,
                self.capability,
                Capability::TextGeneration,
            )),
        }
    }

    pub fn recognizer(&mut self) -> Result<&mut dyn SpeechRecognizer> {
        match self.model.as_mut() {
            Some(LoadedModel::Transcription(model)) => Ok(&mut **model),
            _ => Err(unavailable(
                self.id,
                &self.identifier,
                self.released,
                self.capability,
                Capability::Transcription,
            )),
        }
    }

    pub fn synthesizer(&mut self) -> Result<&mut dyn VoiceSynthesizer> {
        match self.model.as_mut() {
            Some(LoadedModel::SpeechSynthesis(model)) => Ok(&mut **model),
            _ => Err(unavailable(
                self.id,
                &self.identifier,
                self.released,
                self.capability,
                Capability::SpeechSynthesis,
            )),
        }
    }

    /// Drop the weights and reclaim device memory
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(model) = self.model.take() {
            drop(model);
        }
        self.provider.reclaim(self.capability, self.device);

        let mut ledger = self.ledger.lock();
        if ledger.outstanding.remove(&self.id).is_some() {
            ledger.released += 1;
        }

        debug!(
            "Released {} model {:?} on {} (lease {})",
            self.capability, self.identifier, self.device, self.id
        );
    }
}

fn unavailable(
    id: LeaseId,
    identifier: &str,
    released: bool,
    held: Capability,
    wanted: Capability,
) -> NeuroChatError {
    let reason = if released {
        "has been released".to_string()
    } else {
        format!("holds a {} model", held)
    };
    NeuroChatError::ModelLoadError(format!(
        "Lease {} for {:?} {}; {} requested",
        id, identifier, reason, wanted
    ))
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ModelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLease")
            .field("id", &self.id)
            .field("capability", &self.capability)
            .field("identifier", &self.identifier)
            .field("device", &self.device)
            .field("released", &self.released)
            .finish()
    }
}

/// Every lease acquired during one turn.
///
/// Stages release their own lease as soon as they are done with it; closing
/// or dropping the scope releases whatever is left.
pub struct TurnScope {
    id: Uuid,
    manager: ModelManager,
    leases: Vec<ModelLease>,
}

impl TurnScope {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn acquire(&mut self, capability: Capability, identifier: &str) -> Result<&mut ModelLease> {
        let lease = self
            .manager
            .acquire_inner(capability, identifier, Some(self.id))?;
        self.leases.push(lease);
        let index = self.leases.len() - 1;
        Ok(&mut self.leases[index])
    }

    /// Release one lease of this turn
    pub fn release(&mut self, lease_id: LeaseId) {
        if let Some(index) = self.leases.iter().position(|lease| lease.id() == lease_id) {
            let mut lease = self.leases.remove(index);
            lease.release();
        }
    }

    /// Leases of this turn that have not been released yet
    pub fn outstanding(&self) -> usize {
        self.manager.outstanding_for_turn(self.id)
    }

    /// Release everything still held and report how many leases that was
    pub fn close(mut self) -> usize {
        self.release_all()
    }

    fn release_all(&mut self) -> usize {
        let held = self.leases.len();
        for mut lease in self.leases.drain(..) {
            lease.release();
        }

        for record in self.manager.outstanding_records(self.id) {
            warn!(
                "Turn {} still holds {} model {:?}",
                self.id, record.capability, record.identifier
            );
        }
        debug!("Turn scope {} closed ({} leases swept)", self.id, held);
        held
    }
}

impl Drop for TurnScope {
    fn drop(&mut self) {
        if !self.leases.is_empty() {
            self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::CatalogEntry;
    use crate::models::demo::DemoProvider;
    use crate::models::device::CpuOnlyProbe;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingProvider {
        reclaims: AtomicUsize,
    }

    impl ModelProvider for FailingProvider {
        fn load(&self, entry: &CatalogEntry, _device: Device) -> Result<LoadedModel> {
            Err(NeuroChatError::IOError(format!(
                "corrupt weights in {:?}",
                entry.path
            )))
        }

        fn reclaim(&self, _capability: Capability, _device: Device) {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fixture() -> (tempfile::TempDir, ModelCatalog) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("text/demo-model")).unwrap();
        std::fs::create_dir_all(dir.path().join("speech/medium")).unwrap();
        let catalog = ModelCatalog::new(dir.path().join("text"), dir.path().join("speech"));
        (dir, catalog)
    }

    fn manager(catalog: ModelCatalog) -> ModelManager {
        ModelManager::new(catalog, Arc::new(DemoProvider::new()), Arc::new(CpuOnlyProbe))
    }

    #[test]
    fn test_acquire_and_release() {
        let (_dir, catalog) = fixture();
        let manager = manager(catalog);

        let mut lease = manager
            .acquire(Capability::TextGeneration, "demo-model")
            .unwrap();
        assert_eq!(lease.device(), Device::Cpu);
        assert_eq!(manager.outstanding(), 1);
        assert!(lease.text_model().is_ok());
        assert!(lease.recognizer().is_err());

        lease.release();
        lease.release();
        assert!(lease.is_released());
        assert!(lease.text_model().is_err());
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.stats().released, 1);
    }

    #[test]
    fn test_release_none_is_noop() {
        let (_dir, catalog) = fixture();
        let manager = manager(catalog);
        manager.release(None);
        assert_eq!(manager.stats(), LeaseStats::default());
    }

    #[test]
    fn test_drop_releases() {
        let (_dir, catalog) = fixture();
        let manager = manager(catalog);
        {
            let _lease = manager.acquire(Capability::Transcription, "medium").unwrap();
            assert_eq!(manager.outstanding(), 1);
        }
        assert_eq!(manager.outstanding(), 0);
    }

    #[test]
    fn test_missing_model() {
        let (_dir, catalog) = fixture();
        let manager = manager(catalog);
        let err = manager
            .acquire(Capability::TextGeneration, "nope")
            .unwrap_err();
        assert!(matches!(err, NeuroChatError::ModelNotFound(_)));
        assert_eq!(manager.stats().acquired, 0);
    }

    #[test]
    fn test_failed_load_reclaims() {
        let (_dir, catalog) = fixture();
        let provider = Arc::new(FailingProvider {
            reclaims: AtomicUsize::new(0),
        });
        let manager = ModelManager::new(catalog, provider.clone(), Arc::new(CpuOnlyProbe));

        let err = manager
            .acquire(Capability::TextGeneration, "demo-model")
            .unwrap_err();
        assert!(matches!(err, NeuroChatError::ModelLoadError(_)));
        assert_eq!(provider.reclaims.load(Ordering::SeqCst), 1);
        assert_eq!(manager.outstanding(), 0);
    }

    #[test]
    fn test_turn_scope_sweeps_on_drop() {
        let (_dir, catalog) = fixture();
        let manager = manager(catalog);
        {
            let mut scope = manager.begin_turn();
            scope
                .acquire(Capability::TextGeneration, "demo-model")
                .unwrap();
            scope.acquire(Capability::Transcription, "medium").unwrap();
            assert_eq!(scope.outstanding(), 2);
        }
        assert_eq!(manager.outstanding(), 0);
        assert_eq!(manager.stats().released, 2);
    }

    #[test]
    fn test_turn_scope_release_one() {
        let (_dir, catalog) = fixture();
        let manager = manager(catalog);
        let mut scope = manager.begin_turn();
        let id = scope
            .acquire(Capability::TextGeneration, "demo-model")
            .unwrap()
            .id();
        scope.release(id);
        assert_eq!(scope.outstanding(), 0);
        assert_eq!(scope.close(), 0);
    }
}
