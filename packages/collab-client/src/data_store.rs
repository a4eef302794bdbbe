//! Local mirror of the annotation store.

use collab_core::model::AssemblySnapshot;
use collab_core::{AnnotationStore, Change, StoreEvent};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;

/// Client copy of the assemblies it has loaded.
///
/// Every successful mutation is announced on an event channel so views can
/// refresh what they show.
pub struct ClientDataStore {
    store: AnnotationStore,
    events: broadcast::Sender<StoreEvent>,
}

impl ClientDataStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            store: AnnotationStore::new(),
            events,
        }
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Initial bulk load of an assembly fetched from the server.
    pub fn load_assembly(&mut self, snapshot: &AssemblySnapshot) -> Result<()> {
        let mut next = self.store.clone();
        let ids = next.add_assembly(snapshot)?;
        self.store = next;

        let mut events = vec![StoreEvent::AssemblyAdded {
            assembly_id: snapshot.id.clone(),
        }];
        events.extend(ids.into_iter().map(|feature_id| StoreEvent::FeatureAdded { feature_id }));
        self.emit(events);
        Ok(())
    }

    /// Whether a change concerns data this mirror holds.
    ///
    /// Assembly creation and user changes always apply; everything else
    /// needs its assembly to be loaded.
    pub fn is_tracking(&self, change: &Change) -> bool {
        match change {
            Change::AddAssembly(_) | Change::User(_) | Change::DeleteUser(_) => true,
            other => other
                .assembly_id()
                .map(|assembly_id| self.store.has_assembly(assembly_id))
                .unwrap_or(false),
        }
    }

    /// Applies a change atomically: on error the mirror is left untouched.
    pub fn apply(&mut self, change: &mut Change) -> Result<Vec<StoreEvent>> {
        let mut next = self.store.clone();
        let events = change.apply_to_client(&mut next)?;
        self.store = next;
        self.emit(events.clone());
        Ok(events)
    }

    fn emit(&self, events: Vec<StoreEvent>) {
        for event in events {
            // No receivers is fine; nobody is watching yet.
            if self.events.send(event).is_err() {
                debug!("No store event listeners");
                break;
            }
        }
    }
}
