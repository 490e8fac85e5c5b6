use chrono::Duration;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::sync::Arc;

use super::assembler::Assembler;
use super::exporter::{Export, ResourceExporter};
use super::sweeper::{spawn_sweeper, sweep_once, SweepSchedule, SweeperHandle};
use super::transient::TransientCache;
use crate::config::IngestConfig;
use crate::detection::DetectorRegistry;
use crate::error::{IngestError, IngestResult};
use crate::models::{
    CreateReusableTestObjectRequest, TestObject, TestObjectCreationResponse, UploadFile,
    PROP_TEMPORARY,
};
use crate::storage::ResourceAcquirer;
use crate::store::{StoreFilter, TestObjectStore};
use crate::utils::{Clock, SecurePathResolver, SystemClock};

/// Entry point for creating, reading and exporting Test Objects.
///
/// Ad hoc objects stay in the transient cache and are invisible to the
/// public read operations; only [`resolve`](Self::resolve) reaches them.
pub struct TestObjectService {
    config: IngestConfig,
    store: Arc<dyn TestObjectStore>,
    transient: TransientCache,
    assembler: Assembler,
    exporter: ResourceExporter,
    testdata: SecurePathResolver,
    clock: Arc<dyn Clock>,
}

impl TestObjectService {
    pub fn open(config: IngestConfig, store: Arc<dyn TestObjectStore>) -> IngestResult<Self> {
        Self::open_with_clock(config, store, Arc::new(SystemClock))
    }

    /// Set up the managed directories. The staging directory is emptied.
    pub fn open_with_clock(
        config: IngestConfig,
        store: Arc<dyn TestObjectStore>,
        clock: Arc<dyn Clock>,
    ) -> IngestResult<Self> {
        config.validate().map_err(IngestError::Storage)?;

        if config.upload_dir.exists() {
            fs::remove_dir_all(&config.upload_dir)?;
        }
        let staging = SecurePathResolver::new(&config.upload_dir)?;
        let testdata = SecurePathResolver::new(&config.testdata_dir)?;
        log::info!("Upload directory {:?} cleared", staging.root());
        log::info!("Test data directory: {:?}", testdata.root());

        let acquirer = ResourceAcquirer::new(&config, testdata.clone(), staging.clone())?;
        let exporter =
            ResourceExporter::new(testdata.clone(), staging, acquirer.remote().clone());
        let assembler = Assembler::new(
            Arc::new(acquirer),
            Arc::new(DetectorRegistry::new()),
            clock.clone(),
            config.walk_max_depth,
        );
        let transient = TransientCache::new(
            Duration::minutes(config.transient_ttl_minutes as i64),
            clock.clone(),
        );

        Ok(Self {
            config,
            store,
            transient,
            assembler,
            exporter,
            testdata,
            clock,
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Assemble `object` and persist it.
    ///
    /// Objects that already carry an id (e.g. a resolved ad hoc object) are
    /// not acquired again, only type-checked and finalized.
    pub async fn init_resources_and_add(
        &self,
        object: TestObject,
        acceptable: Option<&BTreeSet<String>>,
    ) -> IngestResult<TestObject> {
        let object = self.assembler.assemble(object, &[], acceptable).await?;
        self.store.add(&object).await?;
        log::info!(
            "Test object {} added ({})",
            object.id().unwrap_or_default(),
            object.label
        );
        Ok(object)
    }

    /// Create a temporary object from an upload. It is cached, not stored.
    pub async fn create_ad_hoc(
        &self,
        uploads: &[UploadFile],
        user: Option<&str>,
    ) -> IngestResult<TestObjectCreationResponse> {
        let mut object = TestObject::new();
        object.set_property(PROP_TEMPORARY, "true");

        let mut object = self.create_and_detect(object, uploads, user).await?;
        let response = TestObjectCreationResponse::new(&object, uploads);
        object.label = response.name_for_upload();

        log::info!(
            "Ad hoc test object {} created from {}",
            object.id().unwrap_or_default(),
            object.label
        );
        self.transient.insert(object);
        Ok(response)
    }

    /// Create a persisted object from a request and optional uploads.
    pub async fn create_reusable(
        &self,
        request: &CreateReusableTestObjectRequest,
        uploads: &[UploadFile],
        user: Option<&str>,
    ) -> IngestResult<TestObjectCreationResponse> {
        let object = request.to_test_object()?;
        let object = self.create_and_detect(object, uploads, user).await?;
        self.store.add(&object).await?;
        Ok(TestObjectCreationResponse::new(&object, uploads))
    }

    async fn create_and_detect(
        &self,
        mut object: TestObject,
        uploads: &[UploadFile],
        user: Option<&str>,
    ) -> IngestResult<TestObject> {
        if let Some(user) = user.filter(|u| !u.is_empty()) {
            object.author = Some(user.to_string());
            object.last_editor = Some(user.to_string());
        }
        self.assembler.assemble(object, uploads, None).await
    }

    /// Look up an object for a test run: transient cache first, then the store.
    pub async fn resolve(&self, id: &str) -> IngestResult<TestObject> {
        if let Some(object) = self.transient.get(id) {
            return Ok(object);
        }
        self.store.get_by_id(id).await
    }

    pub async fn get_by_id(&self, id: &str) -> IngestResult<TestObject> {
        self.deny_transient(id)?;
        self.store.get_by_id(id).await
    }

    pub async fn list(&self, filter: StoreFilter) -> IngestResult<Vec<TestObject>> {
        let objects = self.store.get_all(filter).await?;
        Ok(objects
            .into_iter()
            .filter(|o| !o.id().map(|id| self.transient.contains(id)).unwrap_or(false))
            .collect())
    }

    pub async fn exists(&self, id: &str) -> IngestResult<bool> {
        if self.transient.contains(id) {
            return Ok(false);
        }
        self.store.exists(id).await
    }

    pub async fn delete(&self, id: &str) -> IngestResult<()> {
        self.deny_transient(id)?;
        self.store.delete(id).await
    }

    /// Write the resources of a persisted object to `out`.
    pub async fn get_resources<W: Write + Send>(
        &self,
        id: &str,
        out: &mut W,
    ) -> IngestResult<Export> {
        let object = self.get_by_id(id).await?;
        self.exporter.export(&object, out).await
    }

    /// Names of the directories directly below the test data root, sorted.
    pub fn list_test_data_dirs(&self) -> IngestResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.testdata.root())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Start the daily sweep, unless the configured lifetime disables it.
    pub fn spawn_sweeper(&self) -> IngestResult<Option<SweeperHandle>> {
        let Some(schedule) = SweepSchedule::from_config(&self.config).map_err(IngestError::Storage)?
        else {
            log::info!("Sweeping of temporary test objects is disabled");
            return Ok(None);
        };
        Ok(Some(spawn_sweeper(
            self.store.clone(),
            self.testdata.clone(),
            self.transient.clone(),
            self.clock.clone(),
            schedule,
        )))
    }

    /// Run one sweep right away.
    pub async fn sweep_now(&self) -> usize {
        let lifetime = Duration::minutes(self.config.uploaded_lifetime_expiration_minutes);
        sweep_once(
            self.store.as_ref(),
            &self.testdata,
            &self.transient,
            self.clock.now(),
            lifetime,
        )
        .await
    }

    fn deny_transient(&self, id: &str) -> IngestResult<()> {
        if self.transient.contains(id) {
            return Err(IngestError::TemporaryObjectAccessDenied { id: id.to_string() });
        }
        Ok(())
    }
}
