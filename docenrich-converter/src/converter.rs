//! The converter lifecycle.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, info, trace};

use docenrich_bundle::{DirPackageStore, InstalledComponent, PackageStore};
use docenrich_engine::{AnnotationGraphAdapter, EngineFactory};

use crate::enricher::DocumentEnricher;
use crate::error::ConverterError;
use crate::options::{ContentSpec, ConverterOptions};
use crate::projector::FeatureProjector;
use crate::provisioner::{EngineProvisioner, SupportLayout};

/// A pipeline stage turning input bytes into output bytes.
///
/// `convert` takes `&mut self`: one call at a time per instance.
pub trait Converter {
    /// `None` in, `None` out.
    fn convert(&mut self, data: Option<&[u8]>) -> Result<Option<Vec<u8>>, ConverterError>;

    /// Ends the converter's life. Every later call fails with
    /// [`ConverterError::Terminated`], including a second `terminate`.
    fn terminate(&mut self) -> Result<(), ConverterError>;

    fn is_alive(&self) -> bool;
}

/// Enriches VXML documents with annotations from a provisioned engine.
pub struct EnrichingConverter {
    enricher: DocumentEnricher,
    component: InstalledComponent,
    alive: bool,
}

impl EnrichingConverter {
    /// Provisions the configured bundle into `<support-root>/run`.
    pub fn new(
        options: &ConverterOptions,
        factory: &dyn EngineFactory,
    ) -> Result<Self, ConverterError> {
        let store = DirPackageStore::new(options.install_dir())
            .with_lock_timeout(options.install_lock_timeout);
        Self::with_store(options, store, factory)
    }

    pub fn with_store<S: PackageStore>(
        options: &ConverterOptions,
        store: S,
        factory: &dyn EngineFactory,
    ) -> Result<Self, ConverterError> {
        let layout = SupportLayout::from_options(options);
        let provisioned = EngineProvisioner::new(store).provision(
            &layout,
            &options.pear_filename,
            factory,
            &options.tuning(),
        )?;

        let type_system = provisioned.engine.type_system();
        let specs = options
            .content_types
            .iter()
            .map(|raw| ContentSpec::parse(raw, &type_system))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            component_id = %provisioned.component.component_id,
            outcome = ?provisioned.outcome,
            content_specs = specs.len(),
            "Converter ready"
        );
        let enricher = DocumentEnricher::new(
            AnnotationGraphAdapter::new(provisioned.engine),
            FeatureProjector::new(options.annotation_offsets),
            specs,
        )
        .with_filter(options.content_list.clone(), options.exclude_by_default);

        Ok(Self {
            enricher,
            component: provisioned.component,
            alive: true,
        })
    }

    /// The installed component the engine was built from.
    pub fn component(&self) -> &InstalledComponent {
        &self.component
    }

    fn check_alive(&self) -> Result<(), ConverterError> {
        if !self.alive {
            error!("Converter has already been terminated");
            return Err(ConverterError::Terminated);
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl Converter for EnrichingConverter {
    fn convert(&mut self, data: Option<&[u8]>) -> Result<Option<Vec<u8>>, ConverterError> {
        trace!("convert: entry");
        self.check_alive()?;
        let Some(data) = data else {
            trace!("convert: exit");
            return Ok(None);
        };

        let enricher = &self.enricher;
        let result = match panic::catch_unwind(AssertUnwindSafe(|| enricher.enrich(data))) {
            Ok(Ok(output)) => Ok(Some(output)),
            Ok(Err(e)) => Err(ConverterError::conversion(
                format!("error calling analysis engine: {e}"),
                e,
            )),
            Err(payload) => Err(ConverterError::Conversion {
                message: format!(
                    "analysis engine panicked: {}",
                    panic_message(payload.as_ref())
                ),
                source: None,
            }),
        };
        if let Err(e) = &result {
            error!(error = %e, "Conversion failed");
        }
        trace!("convert: exit");
        result
    }

    fn terminate(&mut self) -> Result<(), ConverterError> {
        self.check_alive()?;
        trace!("Terminating");
        self.alive = false;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}
