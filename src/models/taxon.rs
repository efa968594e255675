use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

/// TaxonEntity is the canonical scientific-name record
/// Maps to `boom_taxa` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TaxonEntity {
    pub taxon_id: i64,
    /// Set only for user-supplied names
    pub user_id: Option<String>,
    pub taxonomy_source_id: Option<i32>,
    pub taxonomy_source_key: Option<String>,
    /// Stable content-derived identifier, see [`compute_squid`]
    pub squid: String,
    pub scientific_name: String,
    pub canonical_name: Option<String>,
    pub rank: Option<String>,
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub taxon_class: Option<String>,
    pub taxon_order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub last_occurrence_count: i64,
    pub mod_time: DateTime<Utc>,
}

impl TaxonEntity {
    /// Natural identity this record is unique by
    pub fn identity(&self) -> TaxonIdentity {
        match (self.taxonomy_source_id, &self.taxonomy_source_key) {
            (Some(source_id), Some(key)) => TaxonIdentity::Authority {
                source_id,
                key: key.clone(),
            },
            _ => TaxonIdentity::User {
                user_id: self.user_id.clone().unwrap_or_default(),
                scientific_name: self.scientific_name.clone(),
            },
        }
    }

    /// Name shown on occurrence sets: the canonical name when the authority supplied one
    pub fn display_name(&self) -> &str {
        self.canonical_name
            .as_deref()
            .unwrap_or(self.scientific_name.as_str())
    }
}

/// The two natural keys a taxon can be unique by
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaxonIdentity {
    /// Sourced from a taxonomy authority
    Authority { source_id: i32, key: String },
    /// Supplied by a user, matched by exact case-preserving name
    User {
        user_id: String,
        scientific_name: String,
    },
}

/// Content-derived taxon identifier.
///
/// SHA-256 over the natural identity, so two catalogs that agree on identity
/// agree on the squid without coordinating.
pub fn compute_squid(identity: &TaxonIdentity) -> String {
    let material = match identity {
        TaxonIdentity::Authority { source_id, key } => format!("authority:{source_id}:{key}"),
        TaxonIdentity::User {
            user_id,
            scientific_name,
        } => format!("user:{user_id}:{scientific_name}"),
    };
    let digest = Sha256::digest(material.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// New TaxonEntity for find-or-insert (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTaxon {
    pub identity: TaxonIdentity,
    pub scientific_name: String,
    pub canonical_name: Option<String>,
    pub rank: Option<String>,
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub taxon_class: Option<String>,
    pub taxon_order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
    pub last_occurrence_count: i64,
}

impl NewTaxon {
    /// A user-supplied name with no authority metadata
    pub fn user_supplied(user_id: &str, scientific_name: &str, count: i64) -> Self {
        Self::bare(
            TaxonIdentity::User {
                user_id: user_id.to_string(),
                scientific_name: scientific_name.to_string(),
            },
            scientific_name,
            count,
        )
    }

    /// An authority-keyed name whose classification is not known locally
    pub fn authority_keyed(source_id: i32, key: &str, scientific_name: &str, count: i64) -> Self {
        Self::bare(
            TaxonIdentity::Authority {
                source_id,
                key: key.to_string(),
            },
            scientific_name,
            count,
        )
    }

    fn bare(identity: TaxonIdentity, scientific_name: &str, count: i64) -> Self {
        Self {
            identity,
            scientific_name: scientific_name.to_string(),
            canonical_name: None,
            rank: None,
            kingdom: None,
            phylum: None,
            taxon_class: None,
            taxon_order: None,
            family: None,
            genus: None,
            last_occurrence_count: count,
        }
    }

    pub fn squid(&self) -> String {
        compute_squid(&self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squid_is_stable_and_identity_scoped() {
        let a = NewTaxon::user_supplied("kubi", "Heuchera americana", 12);
        let b = NewTaxon::user_supplied("kubi", "Heuchera americana", 40);
        let other_user = NewTaxon::user_supplied("anon", "Heuchera americana", 12);

        assert_eq!(a.squid(), b.squid());
        assert_ne!(a.squid(), other_user.squid());
        assert_eq!(a.squid().len(), 64);
    }

    #[test]
    fn test_names_are_case_preserving() {
        let lower = NewTaxon::user_supplied("kubi", "heuchera americana", 1);
        let upper = NewTaxon::user_supplied("kubi", "Heuchera americana", 1);
        assert_ne!(lower.squid(), upper.squid());
    }

    #[test]
    fn test_authority_identity_ignores_name() {
        let a = NewTaxon::authority_keyed(1, "2435099", "Puma concolor", 1);
        let b = NewTaxon::authority_keyed(1, "2435099", "Felis concolor", 1);
        assert_eq!(a.squid(), b.squid());
    }
}
