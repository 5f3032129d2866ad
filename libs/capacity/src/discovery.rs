//! Candidate instance type discovery.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::DiscoveryError;
use crate::provider::{CapacityApi, InstanceTypeInfo};
use crate::types::InstanceMeta;

/// Instance types that qualify for a request, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    pub instance_types: Vec<String>,
    pub meta: BTreeMap<String, InstanceMeta>,
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        self.instance_types.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instance_types.len()
    }
}

/// Fetch the catalog for the handle's region and keep the GPU types that
/// match `families` and carry at least `min_gpus` accelerators.
///
/// No partial result is returned if the catalog fetch fails.
pub async fn discover(
    api: &dyn CapacityApi,
    families: &[String],
    min_gpus: i32,
) -> Result<Candidates, DiscoveryError> {
    let catalog = api
        .describe_instance_types()
        .await
        .map_err(|source| DiscoveryError {
            region: api.region().to_string(),
            source,
        })?;

    let candidates = filter_catalog(&catalog, families, min_gpus);
    debug!(
        region = api.region(),
        catalog_size = catalog.len(),
        candidates = candidates.len(),
        "Filtered instance catalog"
    );
    Ok(candidates)
}

/// Pure filter over a catalog snapshot.
pub fn filter_catalog(
    catalog: &[InstanceTypeInfo],
    families: &[String],
    min_gpus: i32,
) -> Candidates {
    let mut candidates = Candidates::default();

    for info in catalog {
        let Some(gpu) = &info.gpu_info else {
            continue;
        };
        let gpu_count: i32 = gpu.gpus.iter().filter_map(|g| g.count).sum();
        if gpu_count < min_gpus || !matches_family(&info.instance_type, families) {
            continue;
        }
        if candidates.meta.contains_key(&info.instance_type) {
            continue;
        }

        candidates.instance_types.push(info.instance_type.clone());
        candidates.meta.insert(
            info.instance_type.clone(),
            InstanceMeta {
                instance_type: info.instance_type.clone(),
                vcpus: info.default_vcpus.unwrap_or(0),
                memory_mib: info.memory_mib.unwrap_or(0),
                gpu_count,
                gpu_memory_mib: gpu.total_gpu_memory_mib.unwrap_or(0),
            },
        );
    }

    candidates
}

/// True when `families` is empty or `instance_type` starts with one of them.
pub fn matches_family(instance_type: &str, families: &[String]) -> bool {
    families.is_empty() || families.iter().any(|f| instance_type.starts_with(f.as_str()))
}
