use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::detection::{DetectionResource, DetectorRegistry};
use crate::error::{IngestError, IngestResult};
use crate::models::{TestObject, UploadFile, PROP_DOWNLOADABLE, RESOURCE_DATA};
use crate::storage::ResourceAcquirer;
use crate::utils::Clock;

/// Item hash of an object whose data has not been acquired yet
pub const UNHASHED: &str = "0";

const DEFAULT_AUTHOR: &str = "unknown";
const INITIAL_VERSION: &str = "1.0.0";

/// Stages of Test Object assembly, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AssemblyState {
    /// Id assigned, nothing acquired yet
    New,
    /// Data acquired and hashed
    Resourced,
    /// Type detected and metadata normalized
    TypeResolved,
    /// Ready to be stored or cached
    Finalized,
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssemblyState::New => "NEW",
            AssemblyState::Resourced => "RESOURCED",
            AssemblyState::TypeResolved => "TYPE-RESOLVED",
            AssemblyState::Finalized => "FINALIZED",
        };
        f.write_str(name)
    }
}

/// An object moving through assembly
#[derive(Debug)]
pub struct Assembly {
    object: TestObject,
    state: AssemblyState,
}

impl Assembly {
    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn object(&self) -> &TestObject {
        &self.object
    }

    pub fn into_object(self) -> TestObject {
        self.object
    }

    fn advance(&mut self, from: AssemblyState, to: AssemblyState) -> IngestResult<()> {
        if self.state != from {
            return Err(IngestError::Storage(format!(
                "Invalid assembly transition {} -> {} (currently {})",
                from, to, self.state
            )));
        }
        log::debug!(
            "Test object {} {} -> {}",
            self.object.id().unwrap_or_default(),
            from,
            to
        );
        self.state = to;
        Ok(())
    }
}

/// Turns caller input into a finalized Test Object:
/// NEW -> RESOURCED -> TYPE-RESOLVED -> FINALIZED.
pub struct Assembler {
    acquirer: Arc<ResourceAcquirer>,
    detectors: Arc<DetectorRegistry>,
    clock: Arc<dyn Clock>,
    walk_max_depth: usize,
}

impl Assembler {
    pub fn new(
        acquirer: Arc<ResourceAcquirer>,
        detectors: Arc<DetectorRegistry>,
        clock: Arc<dyn Clock>,
        walk_max_depth: usize,
    ) -> Self {
        Self {
            acquirer,
            detectors,
            clock,
            walk_max_depth,
        }
    }

    /// Start assembly.
    ///
    /// Objects without id get a fresh one and enter NEW. Objects that already
    /// carry an id are reused as they are and enter RESOURCED directly.
    pub fn begin(&self, mut object: TestObject) -> Assembly {
        if object.id().is_some() {
            return Assembly {
                object,
                state: AssemblyState::Resourced,
            };
        }

        object.assign_fresh_id();
        object.item_hash = Some(UNHASHED.to_string());
        object.creation_date = Some(self.clock.now());
        log::debug!("Test object {} NEW", object.id().unwrap_or_default());
        Assembly {
            object,
            state: AssemblyState::New,
        }
    }

    /// NEW -> RESOURCED
    pub async fn acquire(&self, assembly: &mut Assembly, uploads: &[UploadFile]) -> IngestResult<()> {
        self.acquirer.acquire(&mut assembly.object, uploads).await?;
        if assembly.object.author.is_none() {
            assembly.object.author = Some(DEFAULT_AUTHOR.to_string());
        }
        assembly.advance(AssemblyState::New, AssemblyState::Resourced)
    }

    /// RESOURCED -> TYPE-RESOLVED
    pub fn resolve_type(
        &self,
        assembly: &mut Assembly,
        acceptable: Option<&BTreeSet<String>>,
    ) -> IngestResult<()> {
        let object = &mut assembly.object;
        let resource = DetectionResource::primary_of(object, self.walk_max_depth)
            .ok_or(IngestError::ResourceRequired)?;

        let detected = self.detectors.detect(&resource, acceptable)?;
        detected.enrich_and_normalize(object);

        object.remote_resource = if !resource.uri.is_local() {
            Some(resource.uri.clone())
        } else {
            object
                .resource(RESOURCE_DATA)
                .filter(|uri| !uri.is_local())
                .cloned()
        };

        assembly.advance(AssemblyState::Resourced, AssemblyState::TypeResolved)
    }

    /// TYPE-RESOLVED -> FINALIZED
    pub fn finalize(&self, assembly: &mut Assembly) -> IngestResult<()> {
        let object = &mut assembly.object;
        object.version = Some(INITIAL_VERSION.to_string());
        object.last_update_date = Some(self.clock.now());
        if object.last_editor.is_none() {
            let editor = object
                .author
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());
            object.last_editor = Some(editor);
        }
        object.local_path = Some(".".to_string());
        object.set_property(PROP_DOWNLOADABLE, "false");

        assembly.advance(AssemblyState::TypeResolved, AssemblyState::Finalized)
    }

    /// Run all stages. Failures are terminal and never retried.
    ///
    /// Data acquired for a fresh object is discarded again when a later
    /// stage fails.
    pub async fn assemble(
        &self,
        object: TestObject,
        uploads: &[UploadFile],
        acceptable: Option<&BTreeSet<String>>,
    ) -> IngestResult<TestObject> {
        let mut assembly = self.begin(object);
        let fresh = assembly.state() == AssemblyState::New;
        if fresh {
            self.acquire(&mut assembly, uploads).await?;
        }

        let resolved = self
            .resolve_type(&mut assembly, acceptable)
            .and_then(|()| self.finalize(&mut assembly));
        if let Err(e) = resolved {
            if fresh {
                self.acquirer.discard(assembly.object.id().unwrap_or_default());
            }
            return Err(e);
        }
        Ok(assembly.into_object())
    }
}
