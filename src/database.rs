//! SQLite relational store: feature flags, asset groups and their
//! collections, data-quality history, and edge composition records

use crate::graph_types::{EdgeKey, NodeId, RelationshipId};
use crate::kinds::EdgeKind;
use crate::post_processing::CompositionRecord;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const FLAG_TIERING_ENABLED: &str = "tiering_enabled";
pub const FLAG_ADCS_ENABLED: &str = "adcs_enabled";
pub const FLAG_NTLM_POST_PROCESSING: &str = "ntlm_post_processing";
pub const FLAG_CITRIX_RDP_SUPPORT: &str = "citrix_rdp_support";

pub const TIER_ZERO_GROUP_NAME: &str = "Admin Tier Zero";
pub const OWNED_GROUP_NAME: &str = "Owned";
pub const OWNED_TAG: &str = "owned";

/// Feature flags read once per analysis run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub tiering_enabled: bool,
    pub adcs_enabled: bool,
    pub ntlm_post_processing: bool,
    pub citrix_rdp_support: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetGroupSelector {
    pub id: i64,
    pub asset_group_id: i64,
    pub name: String,
    /// Object id of the selected node
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetGroup {
    pub id: i64,
    pub name: String,
    pub tag: String,
    pub system_group: bool,
    pub selectors: Vec<AssetGroupSelector>,
}

/// One tagged node captured in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetGroupCollectionEntry {
    pub object_id: String,
    pub node_label: String,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetGroupCollection {
    pub id: i64,
    pub asset_group_id: i64,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<AssetGroupCollectionEntry>,
}

/// Per-domain data-quality row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdDataQualityStat {
    pub domain_sid: String,
    pub users: i64,
    pub groups: i64,
    pub computers: i64,
    pub ous: i64,
    pub containers: i64,
    pub gpos: i64,
    pub acls: i64,
    pub sessions: i64,
    pub relationships: i64,
    pub session_completeness: f64,
    pub local_group_completeness: f64,
    pub run_id: String,
}

/// Totals across every domain of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdDataQualityAggregation {
    pub domains: i64,
    pub users: i64,
    pub groups: i64,
    pub computers: i64,
    pub ous: i64,
    pub containers: i64,
    pub gpos: i64,
    pub acls: i64,
    pub sessions: i64,
    pub relationships: i64,
    pub session_completeness: f64,
    pub local_group_completeness: f64,
    pub run_id: String,
}

/// Database manager
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `db_path`
    pub fn new(db_path: &Path) -> Result<Self> {
        info!("Opening database at: {:?}", db_path);

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {:?}", db_path))?;

        // WAL for concurrent readers during a run
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", "5000")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Failed to acquire database lock: {}", e))
    }

    /// Initialize database schema
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS feature_flags (
                key TEXT PRIMARY KEY,
                enabled BOOLEAN NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS asset_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                tag TEXT NOT NULL UNIQUE,
                system_group BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS asset_group_selectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                asset_group_id INTEGER NOT NULL REFERENCES asset_groups(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                selector TEXT NOT NULL,
                UNIQUE (asset_group_id, selector)
            );

            CREATE TABLE IF NOT EXISTS asset_group_collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                asset_group_id INTEGER NOT NULL REFERENCES asset_groups(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS asset_group_collection_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection_id INTEGER NOT NULL REFERENCES asset_group_collections(id) ON DELETE CASCADE,
                object_id TEXT NOT NULL,
                node_label TEXT NOT NULL,
                properties TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ad_data_quality_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_sid TEXT NOT NULL,
                users INTEGER NOT NULL,
                groups INTEGER NOT NULL,
                computers INTEGER NOT NULL,
                ous INTEGER NOT NULL,
                containers INTEGER NOT NULL,
                gpos INTEGER NOT NULL,
                acls INTEGER NOT NULL,
                sessions INTEGER NOT NULL,
                relationships INTEGER NOT NULL,
                session_completeness REAL NOT NULL,
                local_group_completeness REAL NOT NULL,
                run_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ad_data_quality_aggregations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domains INTEGER NOT NULL,
                users INTEGER NOT NULL,
                groups INTEGER NOT NULL,
                computers INTEGER NOT NULL,
                ous INTEGER NOT NULL,
                containers INTEGER NOT NULL,
                gpos INTEGER NOT NULL,
                acls INTEGER NOT NULL,
                sessions INTEGER NOT NULL,
                relationships INTEGER NOT NULL,
                session_completeness REAL NOT NULL,
                local_group_completeness REAL NOT NULL,
                run_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edge_compositions (
                composition_id INTEGER PRIMARY KEY,
                start_id INTEGER NOT NULL,
                end_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                node_ids TEXT NOT NULL,
                relationship_ids TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_selectors_group ON asset_group_selectors(asset_group_id);
            CREATE INDEX IF NOT EXISTS idx_collections_group ON asset_group_collections(asset_group_id);
            CREATE INDEX IF NOT EXISTS idx_entries_collection ON asset_group_collection_entries(collection_id);
            CREATE INDEX IF NOT EXISTS idx_dq_domain ON ad_data_quality_stats(domain_sid);",
        )?;

        // Built-in asset groups
        let now = Utc::now().to_rfc3339();
        for (name, tag) in [
            (TIER_ZERO_GROUP_NAME, crate::delegates::ADMIN_TIER_ZERO),
            (OWNED_GROUP_NAME, OWNED_TAG),
        ] {
            conn.execute(
                "INSERT OR IGNORE INTO asset_groups (name, tag, system_group, created_at)
                VALUES (?1, ?2, 1, ?3)",
                params![name, tag, now],
            )?;
        }

        info!("Database schema initialized successfully");
        Ok(())
    }

    // ==========================================
    // Feature flags
    // ==========================================

    pub fn set_feature_flag(&self, key: &str, enabled: bool) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO feature_flags (key, enabled, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET enabled = excluded.enabled, updated_at = excluded.updated_at",
            params![key, enabled, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Stores `enabled` only when the flag has never been set
    pub fn seed_feature_flag(&self, key: &str, enabled: bool) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO feature_flags (key, enabled, updated_at) VALUES (?1, ?2, ?3)",
            params![key, enabled, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    /// Unknown flags read as disabled
    pub fn get_feature_flag(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let enabled = conn
            .query_row(
                "SELECT enabled FROM feature_flags WHERE key = ?1",
                params![key],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(enabled.unwrap_or(false))
    }

    pub fn feature_flags(&self) -> Result<FeatureFlags> {
        Ok(FeatureFlags {
            tiering_enabled: self.get_feature_flag(FLAG_TIERING_ENABLED)?,
            adcs_enabled: self.get_feature_flag(FLAG_ADCS_ENABLED)?,
            ntlm_post_processing: self.get_feature_flag(FLAG_NTLM_POST_PROCESSING)?,
            citrix_rdp_support: self.get_feature_flag(FLAG_CITRIX_RDP_SUPPORT)?,
        })
    }

    // ==========================================
    // Asset groups
    // ==========================================

    pub fn create_asset_group(&self, name: &str, tag: &str, system_group: bool) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO asset_groups (name, tag, system_group, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, tag, system_group, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_asset_group_selector(&self, asset_group_id: i64, name: &str, selector: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO asset_group_selectors (asset_group_id, name, selector) VALUES (?1, ?2, ?3)
            ON CONFLICT(asset_group_id, selector) DO UPDATE SET name = excluded.name",
            params![asset_group_id, name, selector],
        )?;
        let id = conn.query_row(
            "SELECT id FROM asset_group_selectors WHERE asset_group_id = ?1 AND selector = ?2",
            params![asset_group_id, selector],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_asset_group_by_tag(&self, tag: &str) -> Result<Option<AssetGroup>> {
        Ok(self
            .get_asset_groups()?
            .into_iter()
            .find(|group| group.tag == tag))
    }

    /// Every asset group with its selectors, ordered by id
    pub fn get_asset_groups(&self) -> Result<Vec<AssetGroup>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, tag, system_group FROM asset_groups ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AssetGroup {
                id: row.get(0)?,
                name: row.get(1)?,
                tag: row.get(2)?,
                system_group: row.get(3)?,
                selectors: Vec::new(),
            })
        })?;
        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }

        let mut stmt = conn.prepare(
            "SELECT id, asset_group_id, name, selector FROM asset_group_selectors
            WHERE asset_group_id = ?1 ORDER BY id",
        )?;
        for group in &mut groups {
            let rows = stmt.query_map(params![group.id], |row| {
                Ok(AssetGroupSelector {
                    id: row.get(0)?,
                    asset_group_id: row.get(1)?,
                    name: row.get(2)?,
                    selector: row.get(3)?,
                })
            })?;
            for row in rows {
                group.selectors.push(row?);
            }
        }

        Ok(groups)
    }

    // ==========================================
    // Asset group collections
    // ==========================================

    /// Records a collection and its entries atomically. Empty collections are kept.
    pub fn create_asset_group_collection(
        &self,
        asset_group_id: i64,
        entries: &[AssetGroupCollectionEntry],
    ) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO asset_group_collections (asset_group_id, created_at) VALUES (?1, ?2)",
            params![asset_group_id, Utc::now().to_rfc3339()],
        )?;
        let collection_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO asset_group_collection_entries
                    (collection_id, object_id, node_label, properties)
                VALUES (?1, ?2, ?3, ?4)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    collection_id,
                    entry.object_id,
                    entry.node_label,
                    serde_json::to_string(&entry.properties)?
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            "Asset group {} collection {} recorded with {} entries",
            asset_group_id,
            collection_id,
            entries.len()
        );
        Ok(collection_id)
    }

    pub fn get_latest_collection(&self, asset_group_id: i64) -> Result<Option<AssetGroupCollection>> {
        let conn = self.lock()?;

        let header = conn
            .query_row(
                "SELECT id, created_at FROM asset_group_collections
                WHERE asset_group_id = ?1 ORDER BY id DESC LIMIT 1",
                params![asset_group_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((id, created_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT object_id, node_label, properties FROM asset_group_collection_entries
            WHERE collection_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (object_id, node_label, properties) = row?;
            entries.push(AssetGroupCollectionEntry {
                object_id,
                node_label,
                properties: serde_json::from_str(&properties)?,
            });
        }

        Ok(Some(AssetGroupCollection {
            id,
            asset_group_id,
            created_at: parse_timestamp(&created_at)?,
            entries,
        }))
    }

    pub fn count_collections(&self, asset_group_id: i64) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM asset_group_collections WHERE asset_group_id = ?1",
            params![asset_group_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==========================================
    // Data quality
    // ==========================================

    /// Stores one run's per-domain rows and its aggregation together
    pub fn save_ad_data_quality(
        &self,
        stats: &[AdDataQualityStat],
        aggregation: &AdDataQualityAggregation,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO ad_data_quality_stats
                    (domain_sid, users, groups, computers, ous, containers, gpos, acls, sessions,
                     relationships, session_completeness, local_group_completeness, run_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for stat in stats {
                stmt.execute(params![
                    stat.domain_sid,
                    stat.users,
                    stat.groups,
                    stat.computers,
                    stat.ous,
                    stat.containers,
                    stat.gpos,
                    stat.acls,
                    stat.sessions,
                    stat.relationships,
                    stat.session_completeness,
                    stat.local_group_completeness,
                    stat.run_id,
                    now
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO ad_data_quality_aggregations
                (domains, users, groups, computers, ous, containers, gpos, acls, sessions,
                 relationships, session_completeness, local_group_completeness, run_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                aggregation.domains,
                aggregation.users,
                aggregation.groups,
                aggregation.computers,
                aggregation.ous,
                aggregation.containers,
                aggregation.gpos,
                aggregation.acls,
                aggregation.sessions,
                aggregation.relationships,
                aggregation.session_completeness,
                aggregation.local_group_completeness,
                aggregation.run_id,
                now
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_latest_ad_data_quality(&self, domain_sid: &str) -> Result<Option<AdDataQualityStat>> {
        let conn = self.lock()?;
        let stat = conn
            .query_row(
                "SELECT domain_sid, users, groups, computers, ous, containers, gpos, acls, sessions,
                    relationships, session_completeness, local_group_completeness, run_id
                FROM ad_data_quality_stats WHERE domain_sid = ?1 ORDER BY id DESC LIMIT 1",
                params![domain_sid],
                |row| {
                    Ok(AdDataQualityStat {
                        domain_sid: row.get(0)?,
                        users: row.get(1)?,
                        groups: row.get(2)?,
                        computers: row.get(3)?,
                        ous: row.get(4)?,
                        containers: row.get(5)?,
                        gpos: row.get(6)?,
                        acls: row.get(7)?,
                        sessions: row.get(8)?,
                        relationships: row.get(9)?,
                        session_completeness: row.get(10)?,
                        local_group_completeness: row.get(11)?,
                        run_id: row.get(12)?,
                    })
                },
            )
            .optional()?;
        Ok(stat)
    }

    pub fn get_latest_ad_data_quality_aggregation(&self) -> Result<Option<AdDataQualityAggregation>> {
        let conn = self.lock()?;
        let aggregation = conn
            .query_row(
                "SELECT domains, users, groups, computers, ous, containers, gpos, acls, sessions,
                    relationships, session_completeness, local_group_completeness, run_id
                FROM ad_data_quality_aggregations ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(AdDataQualityAggregation {
                        domains: row.get(0)?,
                        users: row.get(1)?,
                        groups: row.get(2)?,
                        computers: row.get(3)?,
                        ous: row.get(4)?,
                        containers: row.get(5)?,
                        gpos: row.get(6)?,
                        acls: row.get(7)?,
                        sessions: row.get(8)?,
                        relationships: row.get(9)?,
                        session_completeness: row.get(10)?,
                        local_group_completeness: row.get(11)?,
                        run_id: row.get(12)?,
                    })
                },
            )
            .optional()?;
        Ok(aggregation)
    }

    // ==========================================
    // Edge compositions
    // ==========================================

    /// Replaces every stored composition with this run's records
    pub fn replace_edge_compositions(&self, records: &[CompositionRecord]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM edge_compositions", [])?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO edge_compositions
                    (composition_id, start_id, end_id, kind, node_ids, relationship_ids)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.composition_id,
                    to_sql_id(record.edge.start.0)?,
                    to_sql_id(record.edge.end.0)?,
                    record.edge.kind.to_string(),
                    serde_json::to_string(&record.node_ids)?,
                    serde_json::to_string(&record.relationship_ids)?
                ])?;
            }
        }
        tx.commit()?;

        info!("Stored {} edge composition records", records.len());
        Ok(records.len())
    }

    pub fn get_edge_composition(&self, composition_id: i64) -> Result<Option<CompositionRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT start_id, end_id, kind, node_ids, relationship_ids
                FROM edge_compositions WHERE composition_id = ?1",
                params![composition_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((start, end, kind, node_ids, relationship_ids)) = row else {
            return Ok(None);
        };
        let kind: EdgeKind = serde_json::from_value(serde_json::Value::String(kind))?;
        let node_ids: BTreeSet<NodeId> = serde_json::from_str(&node_ids)?;
        let relationship_ids: BTreeSet<RelationshipId> = serde_json::from_str(&relationship_ids)?;

        Ok(Some(CompositionRecord {
            composition_id,
            edge: EdgeKey {
                start: NodeId(u64::try_from(start)?),
                end: NodeId(u64::try_from(end)?),
                kind,
            },
            node_ids,
            relationship_ids,
        }))
    }

    pub fn count_edge_compositions(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM edge_compositions", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn to_sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| anyhow!("Node id {} exceeds SQLite integer range", id))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp '{}'", raw))?
        .with_timezone(&Utc))
}
