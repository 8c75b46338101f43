//! Synthetic identities and SubjectAccessReview payload generation
//!
//! Every payload flavor controls how likely a request is to reuse a decision
//! already cached by the target:
//!
//! - **cache-favoring**: a pure modular function of the request index, so the
//!   same index always renders the same review and therefore the same key
//! - **cache-defeating**: embeds a per-call uniqueness token and random
//!   attributes, so the key has never been seen before
//! - **mixed**: picks one of the two with a configured probability
//! - **warm-up**: walks the (user, namespace, resource, verb) product so a
//!   batch covers distinct combinations before any repeats
//! - **high-cardinality**: unique subjects over a bounded set of 100
//!   namespaces, to push the target cache into eviction

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, Result};

/// Namespaces used by the generators
pub const NAMESPACES: [&str; 8] = [
    "default",
    "kube-system",
    "kube-public",
    "dev",
    "staging",
    "production",
    "monitoring",
    "logging",
];

/// Resource kinds used by the generators
pub const RESOURCES: [&str; 8] = [
    "pods",
    "deployments",
    "services",
    "configmaps",
    "secrets",
    "namespaces",
    "nodes",
    "persistentvolumeclaims",
];

/// Verbs used by the generators
pub const VERBS: [&str; 7] = ["get", "list", "watch", "create", "update", "patch", "delete"];

/// API groups; the empty string is the core group
pub const API_GROUPS: [&str; 6] = [
    "",
    "apps",
    "extensions",
    "rbac.authorization.k8s.io",
    "networking.k8s.io",
    "batch",
];

/// Subresources; the empty string means none
pub const SUBRESOURCES: [&str; 5] = ["", "status", "logs", "exec", "scale"];

/// Seed offset for identity UUIDs
const IDENTITY_SEED_BASE: u64 = 1000;

/// Number of namespace buckets used by high-cardinality payloads
const HIGH_CARDINALITY_NAMESPACES: u64 = 100;

const REVIEW_API_VERSION: &str = "authorization.k8s.io/v1";
const REVIEW_KIND: &str = "SubjectAccessReview";

// ============================================================================
// IDENTITIES
// ============================================================================

/// A synthetic user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    pub external_id: String,
    pub groups: Vec<String>,
}

/// Fixed-size pool of identities, built once per run and shared read-only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPool {
    identities: Arc<[Identity]>,
}

impl IdentityPool {
    /// Build a deterministic pool of `size` identities
    pub fn build(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(ProbeError::EmptyIdentityPool(size));
        }

        let identities: Vec<Identity> = (0..size)
            .map(|i| Identity {
                email: format!("testuser{}@contoso.com", i),
                external_id: deterministic_uuid(i as u64 + IDENTITY_SEED_BASE),
                groups: vec!["system:authenticated".to_string(), format!("team-{}", i % 5)],
            })
            .collect();

        Ok(Self {
            identities: identities.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Always false; an empty pool cannot be built
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Identity at `index`, wrapping modulo the pool size
    pub fn get(&self, index: u64) -> &Identity {
        &self.identities[(index % self.identities.len() as u64) as usize]
    }

    pub fn as_slice(&self) -> &[Identity] {
        &self.identities
    }
}

/// Lay the hex form of `seed` out as a v4-shaped UUID.
///
/// Not random and not globally unique: distinct seeds give distinct strings,
/// and the same seed always gives the same string.
pub fn deterministic_uuid(seed: u64) -> String {
    let hex = format!("{:08x}", seed);
    let padded = format!("{:0>12}", hex);
    format!(
        "{}-{}-4{}-8{}-{}",
        &hex[..8],
        &hex[..4],
        &hex[1..4],
        &hex[1..4],
        &padded[..12]
    )
}

fn random_uuid<R: Rng + ?Sized>(rng: &mut R) -> String {
    uuid::Builder::from_random_bytes(rng.gen()).into_uuid().to_string()
}

// ============================================================================
// REQUEST MODEL
// ============================================================================

/// Attributes of the resource being accessed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    pub namespace: String,
    pub verb: String,
    #[serde(rename = "group")]
    pub api_group: String,
    pub resource: String,
    pub version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subresource: Option<String>,
}

/// Extra subject attributes; the target keys its cache on the object id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewExtra {
    #[serde(rename = "oid")]
    pub external_id: Vec<String>,
}

/// An authorization check, as carried in the `spec` of a SubjectAccessReview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationCheckRequest {
    #[serde(rename = "user")]
    pub subject: String,
    pub groups: Vec<String>,
    pub resource_attributes: ResourceAttributes,
    pub extra: ReviewExtra,
}

/// Wire envelope posted to `/subjectaccessreviews`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccessReview<'a> {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub spec: &'a AuthorizationCheckRequest,
}

impl AuthorizationCheckRequest {
    /// Wrap in the review envelope for sending
    pub fn review(&self) -> SubjectAccessReview<'_> {
        SubjectAccessReview {
            api_version: REVIEW_API_VERSION,
            kind: REVIEW_KIND,
            spec: self,
        }
    }

    /// Serialized review body
    pub fn to_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.review())
    }

    /// Key under which the target is expected to cache this decision
    pub fn cache_key(&self) -> CacheKey {
        derive_cache_key(self)
    }
}

/// Analytical cache key: `externalId/namespace/apiGroup/resource/verb[/subresource]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

/// Derive the cache key of a request. Pure; `name` and `version` do not
/// participate.
pub fn derive_cache_key(request: &AuthorizationCheckRequest) -> CacheKey {
    let attrs = &request.resource_attributes;
    let owner = request
        .extra
        .external_id
        .first()
        .filter(|id| !id.is_empty())
        .unwrap_or(&request.subject);

    let mut key = format!(
        "{}/{}/{}/{}/{}",
        owner,
        or_dash(&attrs.namespace),
        or_dash(&attrs.api_group),
        attrs.resource,
        attrs.verb
    );
    if let Some(sub) = attrs.subresource.as_deref().filter(|s| !s.is_empty()) {
        key.push('/');
        key.push_str(sub);
    }
    CacheKey(key)
}

fn pick<'a>(set: &[&'a str], index: u64) -> &'a str {
    set[(index % set.len() as u64) as usize]
}

fn subresource(index: u64) -> Option<String> {
    let sub = pick(&SUBRESOURCES, index);
    (!sub.is_empty()).then(|| sub.to_string())
}

// ============================================================================
// GENERATORS
// ============================================================================

/// Deterministic payload for `index`; equal indices give equal payloads.
pub fn cache_favoring_payload(pool: &IdentityPool, index: u64) -> AuthorizationCheckRequest {
    let identity = pool.get(index);
    let resource_index = index % RESOURCES.len() as u64;

    AuthorizationCheckRequest {
        subject: identity.email.clone(),
        groups: identity.groups.clone(),
        resource_attributes: ResourceAttributes {
            namespace: pick(&NAMESPACES, index).to_string(),
            verb: pick(&VERBS, index).to_string(),
            api_group: pick(&API_GROUPS, resource_index).to_string(),
            resource: pick(&RESOURCES, resource_index).to_string(),
            version: "v1".to_string(),
            name: format!("test-resource-{}", resource_index),
            subresource: None,
        },
        extra: ReviewExtra {
            external_id: vec![identity.external_id.clone()],
        },
    }
}

/// Payload whose key has, with overwhelming probability, never been seen
pub fn cache_defeating_payload(vu_id: u64, iteration: u64) -> AuthorizationCheckRequest {
    cache_defeating_payload_with(vu_id, iteration, &mut rand::thread_rng())
}

pub fn cache_defeating_payload_with<R: Rng + ?Sized>(
    vu_id: u64,
    iteration: u64,
    rng: &mut R,
) -> AuthorizationCheckRequest {
    let unique_id = format!(
        "{}-{}-{}",
        vu_id,
        iteration,
        chrono::Utc::now().timestamp_millis()
    );
    let short: String = unique_id.chars().take(8).collect();

    AuthorizationCheckRequest {
        subject: format!("unique-user-{}@contoso.com", unique_id),
        groups: vec!["system:authenticated".to_string()],
        resource_attributes: ResourceAttributes {
            namespace: format!("ns-{}", short),
            verb: VERBS[rng.gen_range(0..VERBS.len())].to_string(),
            api_group: API_GROUPS[rng.gen_range(0..API_GROUPS.len())].to_string(),
            resource: RESOURCES[rng.gen_range(0..RESOURCES.len())].to_string(),
            version: "v1".to_string(),
            name: format!("resource-{}", short),
            subresource: None,
        },
        extra: ReviewExtra {
            external_id: vec![random_uuid(rng)],
        },
    }
}

/// Cache-favoring with probability `hit_ratio`, cache-defeating otherwise.
/// The ratio is clamped to `[0, 1]`.
pub fn mixed_payload(
    pool: &IdentityPool,
    vu_id: u64,
    iteration: u64,
    hit_ratio: f64,
) -> AuthorizationCheckRequest {
    mixed_payload_with(pool, vu_id, iteration, hit_ratio, &mut rand::thread_rng())
}

pub fn mixed_payload_with<R: Rng + ?Sized>(
    pool: &IdentityPool,
    vu_id: u64,
    iteration: u64,
    hit_ratio: f64,
    rng: &mut R,
) -> AuthorizationCheckRequest {
    let hit_ratio = hit_ratio.clamp(0.0, 1.0);
    if rng.gen::<f64>() < hit_ratio {
        cache_favoring_payload(pool, iteration)
    } else {
        cache_defeating_payload_with(vu_id, iteration, rng)
    }
}

/// Element `index` of the warm-up enumeration.
///
/// The index is decomposed in mixed radix (user, namespace, resource, verb)
/// so consecutive indices cover distinct combinations.
pub fn warmup_payload(pool: &IdentityPool, index: u64) -> AuthorizationCheckRequest {
    let users = pool.len() as u64;
    let namespaces = NAMESPACES.len() as u64;
    let resources = RESOURCES.len() as u64;

    let user_index = index % users;
    let ns_index = (index / users) % namespaces;
    let res_index = (index / (users * namespaces)) % resources;
    let verb_index = (index / (users * namespaces * resources)) % VERBS.len() as u64;

    let identity = pool.get(user_index);

    AuthorizationCheckRequest {
        subject: identity.email.clone(),
        groups: identity.groups.clone(),
        resource_attributes: ResourceAttributes {
            namespace: pick(&NAMESPACES, ns_index).to_string(),
            verb: pick(&VERBS, verb_index).to_string(),
            api_group: pick(&API_GROUPS, res_index).to_string(),
            resource: pick(&RESOURCES, res_index).to_string(),
            version: "v1".to_string(),
            name: format!("warmup-resource-{}", index),
            subresource: None,
        },
        extra: ReviewExtra {
            external_id: vec![identity.external_id.clone()],
        },
    }
}

/// The first `count` warm-up payloads, in order
pub fn warmup_batch(pool: &IdentityPool, count: usize) -> Vec<AuthorizationCheckRequest> {
    (0..count as u64).map(|i| warmup_payload(pool, i)).collect()
}

/// Unique subject per call over 100 namespace buckets
pub fn high_cardinality_payload(vu_id: u64, iteration: u64) -> AuthorizationCheckRequest {
    high_cardinality_payload_with(vu_id, iteration, &mut rand::thread_rng())
}

pub fn high_cardinality_payload_with<R: Rng + ?Sized>(
    vu_id: u64,
    iteration: u64,
    rng: &mut R,
) -> AuthorizationCheckRequest {
    let timestamp = chrono::Utc::now().timestamp_millis();

    AuthorizationCheckRequest {
        subject: format!("stress-user-{}-{}@contoso.com", vu_id, iteration),
        groups: vec![
            "system:authenticated".to_string(),
            format!("stress-group-{}", vu_id),
        ],
        resource_attributes: ResourceAttributes {
            namespace: format!("stress-ns-{}", iteration % HIGH_CARDINALITY_NAMESPACES),
            verb: pick(&VERBS, iteration).to_string(),
            api_group: pick(&API_GROUPS, iteration).to_string(),
            resource: pick(&RESOURCES, iteration).to_string(),
            version: "v1".to_string(),
            name: format!("stress-resource-{}-{}", timestamp, iteration),
            subresource: subresource(iteration),
        },
        extra: ReviewExtra {
            external_id: vec![random_uuid(rng)],
        },
    }
}

// ============================================================================
// STRATEGIES
// ============================================================================

/// Which generator a phase's work unit draws from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadStrategy {
    /// Deterministic payloads; with `modulo`, the index is `iteration % modulo`
    CacheFavoring { modulo: Option<u64> },
    CacheDefeating,
    Mixed { hit_ratio: f64 },
    WarmupDiverse,
    HighCardinality,
}

impl PayloadStrategy {
    pub fn generate(&self, pool: &IdentityPool, vu_id: u64, iteration: u64) -> AuthorizationCheckRequest {
        match self {
            Self::CacheFavoring { modulo } => {
                let index = match modulo {
                    Some(m) if *m > 0 => iteration % m,
                    _ => iteration,
                };
                cache_favoring_payload(pool, index)
            }
            Self::CacheDefeating => cache_defeating_payload(vu_id, iteration),
            Self::Mixed { hit_ratio } => mixed_payload(pool, vu_id, iteration, *hit_ratio),
            Self::WarmupDiverse => warmup_payload(pool, iteration),
            Self::HighCardinality => high_cardinality_payload(vu_id, iteration),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CacheFavoring { .. } => "cache-favoring",
            Self::CacheDefeating => "cache-defeating",
            Self::Mixed { .. } => "mixed",
            Self::WarmupDiverse => "warmup-diverse",
            Self::HighCardinality => "high-cardinality",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn pool(size: usize) -> IdentityPool {
        IdentityPool::build(size).unwrap()
    }

    #[test]
    fn test_deterministic_uuid_layout() {
        assert_eq!(deterministic_uuid(1000), "000003e8-0000-4000-8000-0000000003e8");
        assert_eq!(deterministic_uuid(1049), "00000419-0000-4000-8000-000000000419");
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert_eq!(IdentityPool::build(0), Err(ProbeError::EmptyIdentityPool(0)));
    }

    #[test]
    fn test_pool_contents() {
        let pool = pool(7);
        assert_eq!(pool.len(), 7);
        let first = &pool.as_slice()[0];
        assert_eq!(first.email, "testuser0@contoso.com");
        assert_eq!(first.groups, vec!["system:authenticated", "team-0"]);
        assert_eq!(pool.as_slice()[6].groups[1], "team-1");
        assert_eq!(pool.get(7), first);
    }

    #[test]
    fn test_review_wire_format() {
        let request = cache_favoring_payload(&pool(50), 3);
        let body: serde_json::Value = serde_json::from_slice(&request.to_body().unwrap()).unwrap();

        assert_eq!(body["apiVersion"], "authorization.k8s.io/v1");
        assert_eq!(body["kind"], "SubjectAccessReview");
        assert_eq!(body["spec"]["user"], "testuser3@contoso.com");
        assert_eq!(body["spec"]["resourceAttributes"]["resource"], "configmaps");
        assert_eq!(body["spec"]["resourceAttributes"]["group"], "rbac.authorization.k8s.io");
        assert_eq!(body["spec"]["extra"]["oid"][0], "000003eb-0000-4000-8000-0000000003eb");
        assert!(body["spec"]["resourceAttributes"].get("subresource").is_none());
    }

    #[test]
    fn test_cache_key_format() {
        let request = cache_favoring_payload(&pool(50), 0);
        assert_eq!(
            request.cache_key().as_str(),
            "000003e8-0000-4000-8000-0000000003e8/default/-/pods/get"
        );
    }

    #[test]
    fn test_cache_key_ignores_name_and_tracks_verb() {
        let base = cache_favoring_payload(&pool(10), 4);

        let mut renamed = base.clone();
        renamed.resource_attributes.name = "something-else".into();
        assert_eq!(derive_cache_key(&base), derive_cache_key(&renamed));

        let mut other_verb = base.clone();
        other_verb.resource_attributes.verb = "escalate".into();
        assert_ne!(derive_cache_key(&base), derive_cache_key(&other_verb));
    }

    #[test]
    fn test_cache_key_subresource_and_fallback_owner() {
        let mut request = high_cardinality_payload(1, 1);
        assert!(request.cache_key().as_str().ends_with("/list/status"));

        request.extra.external_id.clear();
        request.resource_attributes.namespace.clear();
        let key = request.cache_key();
        assert!(key.as_str().starts_with("stress-user-1-1@contoso.com/-/"));
    }

    #[test]
    fn test_cache_defeating_keys_are_unique() {
        let mut rng = StdRng::seed_from_u64(7);
        let keys: HashSet<_> = (0..1_000)
            .map(|i| cache_defeating_payload_with(3, i, &mut rng).cache_key())
            .collect();
        assert_eq!(keys.len(), 1_000);
    }

    #[test]
    fn test_mixed_ratio_extremes() {
        let pool = pool(10);
        let mut rng = StdRng::seed_from_u64(1);
        for i in 0..100 {
            let always = mixed_payload_with(&pool, 1, i, 1.0, &mut rng);
            assert_eq!(always, cache_favoring_payload(&pool, i));

            let never = mixed_payload_with(&pool, 1, i, 0.0, &mut rng);
            assert!(never.subject.starts_with("unique-user-"));

            let clamped = mixed_payload_with(&pool, 1, i, 7.5, &mut rng);
            assert_eq!(clamped, cache_favoring_payload(&pool, i));
        }
    }

    #[test]
    fn test_warmup_batch_covers_distinct_combinations() {
        let pool = pool(5);
        let product = 5 * NAMESPACES.len() * RESOURCES.len() * VERBS.len();
        let batch = warmup_batch(&pool, product);
        assert_eq!(batch.len(), product);

        let keys: HashSet<_> = batch.iter().map(derive_cache_key).collect();
        assert_eq!(keys.len(), product);

        let wrapped = warmup_payload(&pool, product as u64);
        assert_eq!(wrapped.cache_key(), batch[0].cache_key());
    }

    #[test]
    fn test_high_cardinality_namespace_buckets() {
        let namespaces: HashSet<_> = (0..1_000)
            .map(|i| high_cardinality_payload(2, i).resource_attributes.namespace)
            .collect();
        assert_eq!(namespaces.len(), 100);
    }

    #[test]
    fn test_strategy_modulo() {
        let pool = pool(50);
        let strategy = PayloadStrategy::CacheFavoring { modulo: Some(200) };
        assert_eq!(
            strategy.generate(&pool, 1, 205),
            cache_favoring_payload(&pool, 5)
        );
        assert_eq!(PayloadStrategy::WarmupDiverse.generate(&pool, 1, 3), warmup_payload(&pool, 3));
    }

    proptest! {
        #[test]
        fn prop_pool_is_deterministic_and_distinct(size in 1usize..400) {
            let a = IdentityPool::build(size).unwrap();
            let b = IdentityPool::build(size).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), size);

            let ids: HashSet<_> = a.as_slice().iter().map(|i| i.external_id.clone()).collect();
            prop_assert_eq!(ids.len(), size);
        }

        #[test]
        fn prop_cache_favoring_is_periodic(size in 1usize..64, index in 0u64..100_000, k in 0u64..4) {
            let pool = IdentityPool::build(size).unwrap();
            let period = size as u64
                * NAMESPACES.len() as u64
                * RESOURCES.len() as u64
                * VERBS.len() as u64;
            prop_assert_eq!(
                cache_favoring_payload(&pool, index),
                cache_favoring_payload(&pool, index + k * period)
            );
        }

        #[test]
        fn prop_cache_key_is_pure(size in 1usize..64, index in 0u64..10_000) {
            let pool = IdentityPool::build(size).unwrap();
            let a = cache_favoring_payload(&pool, index);
            let b = cache_favoring_payload(&pool, index);
            prop_assert_eq!(derive_cache_key(&a), derive_cache_key(&b));
        }
    }
}
