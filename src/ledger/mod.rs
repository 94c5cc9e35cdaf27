//! Local camera ledger.
//!
//! The ledger is a CSV file with one row per remote camera that has been
//! mirrored locally. Rows get a local surrogate `id` on insert, keep the remote
//! id in `real_api_id`, and carry an organization id remapped to a small
//! numbering starting at 2.

use crate::error::Error;
use crate::models::{LocalCameraRow, RemoteCamera};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::Path;

pub mod lock;

pub use lock::LedgerLock;

/// First local organization id handed out by the remap
pub const FIRST_LOCAL_ORGANIZATION_ID: i64 = 2;

/// Result of a reconciliation
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Every requested camera was already in the ledger, file untouched
    Unchanged,
    /// None of the missing cameras exist remotely, file untouched
    NoMatchingCameras { missing: Vec<i64> },
    /// Rows appended and the ledger rewritten
    Inserted {
        rows: Vec<LocalCameraRow>,
        missing: Vec<i64>,
    },
}

impl ReconcileOutcome {
    pub fn inserted_count(&self) -> usize {
        match self {
            ReconcileOutcome::Inserted { rows, .. } => rows.len(),
            _ => 0,
        }
    }

    /// Requested camera ids that the remote list does not know about
    pub fn missing(&self) -> &[i64] {
        match self {
            ReconcileOutcome::Unchanged => &[],
            ReconcileOutcome::NoMatchingCameras { missing } => missing,
            ReconcileOutcome::Inserted { missing, .. } => missing,
        }
    }
}

/// In-memory copy of the ledger file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraLedger {
    rows: Vec<LocalCameraRow>,
}

impl CameraLedger {
    pub fn new(rows: Vec<LocalCameraRow>) -> Self {
        Self { rows }
    }

    /// Load the ledger, or an empty one when the file does not exist.
    /// Unparseable content is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No ledger at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| Error::Ledger(format!("Failed to open {}: {}", path.display(), e)))?;

        let mut rows = Vec::new();
        for (index, record) in reader.deserialize::<LocalCameraRow>().enumerate() {
            let row = record.map_err(|e| {
                Error::Ledger(format!(
                    "Malformed row {} in {}: {}",
                    index + 1,
                    path.display(),
                    e
                ))
            })?;
            rows.push(row);
        }

        Ok(Self { rows })
    }

    /// Write the whole ledger through a temp file renamed over `path`, so a
    /// crash never leaves a truncated ledger behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .context(format!("Failed to create ledger directory {:?}", dir))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .context(format!("Failed to create temp file in {:?}", dir))?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            for row in &self.rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;

        tmp.persist(path)
            .map_err(|e| Error::Io(format!("Failed to replace {}: {}", path.display(), e)))?;

        Ok(())
    }

    pub fn rows(&self) -> &[LocalCameraRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Remote camera ids already mirrored
    pub fn real_api_ids(&self) -> HashSet<i64> {
        self.rows.iter().filter_map(|row| row.real_api_id).collect()
    }

    /// Next free surrogate id
    pub fn next_id(&self) -> i64 {
        self.rows
            .iter()
            .filter_map(|row| row.id)
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Append rows, assigning surrogate ids in order. Returns the stored rows.
    pub fn append(&mut self, mut rows: Vec<LocalCameraRow>) -> Vec<LocalCameraRow> {
        let first = self.next_id();
        for (offset, row) in rows.iter_mut().enumerate() {
            row.id = Some(first + offset as i64);
        }
        self.rows.extend(rows.iter().cloned());
        rows
    }

    /// Renumber organization ids over the whole table.
    ///
    /// Distinct ids are sorted and mapped to 2, 3, 4, ... The mapping depends
    /// only on the set of ids present, not on row order, and it is rebuilt
    /// from scratch every time.
    pub fn remap_organizations(&mut self) -> BTreeMap<i64, i64> {
        let distinct: BTreeSet<i64> = self
            .rows
            .iter()
            .filter_map(|row| row.organization_id)
            .collect();

        let mapping: BTreeMap<i64, i64> = distinct
            .into_iter()
            .zip(FIRST_LOCAL_ORGANIZATION_ID..)
            .collect();

        for row in &mut self.rows {
            if let Some(org) = row.organization_id {
                row.organization_id = mapping.get(&org).copied();
            }
        }

        mapping
    }
}

/// Make sure every camera in `used_camera_ids` has a row in the ledger at
/// `csv_path`.
///
/// Nothing is written when no row has to be added. Ids that the remote list
/// does not contain are reported in the outcome and otherwise ignored.
pub fn reconcile(
    used_camera_ids: &HashSet<i64>,
    remote_cameras: &[RemoteCamera],
    csv_path: &Path,
) -> Result<ReconcileOutcome> {
    let _lock = LedgerLock::acquire(csv_path)?;

    let mut ledger = CameraLedger::load(csv_path)?;
    let present = ledger.real_api_ids();

    let mut needed: Vec<i64> = used_camera_ids.difference(&present).copied().collect();
    needed.sort_unstable();

    if needed.is_empty() {
        debug!("All {} cameras already in ledger", used_camera_ids.len());
        return Ok(ReconcileOutcome::Unchanged);
    }

    let needed_set: HashSet<i64> = needed.iter().copied().collect();
    let mut matched: Vec<&RemoteCamera> = remote_cameras
        .iter()
        .filter(|camera| needed_set.contains(&camera.id))
        .collect();
    matched.sort_by_key(|camera| camera.id);
    matched.dedup_by_key(|camera| camera.id);

    let found: HashSet<i64> = matched.iter().map(|camera| camera.id).collect();
    let missing: Vec<i64> = needed
        .iter()
        .copied()
        .filter(|id| !found.contains(id))
        .collect();

    if !missing.is_empty() {
        warn!(
            "Cameras {:?} are used but missing from the remote camera list",
            missing
        );
    }

    if matched.is_empty() {
        warn!("No new cameras to add to {}", csv_path.display());
        return Ok(ReconcileOutcome::NoMatchingCameras { missing });
    }

    let new_rows: Vec<LocalCameraRow> = matched
        .into_iter()
        .map(LocalCameraRow::from_remote)
        .collect();
    let appended = ledger.append(new_rows);
    let mapping = ledger.remap_organizations();
    debug!("Organization mapping: {:?}", mapping);

    ledger.save(csv_path)?;

    // Report the rows as stored, with their final organization ids
    let appended_ids: HashSet<i64> = appended.iter().filter_map(|row| row.id).collect();
    let rows: Vec<LocalCameraRow> = ledger
        .rows()
        .iter()
        .filter(|row| row.id.map_or(false, |id| appended_ids.contains(&id)))
        .cloned()
        .collect();

    info!(
        "Added {} cameras to {} ({} rows total)",
        rows.len(),
        csv_path.display(),
        ledger.len()
    );

    Ok(ReconcileOutcome::Inserted { rows, missing })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(id: i64, organization_id: i64, name: &str) -> RemoteCamera {
        RemoteCamera {
            id,
            organization_id,
            name: Some(name.to_string()),
            angle_of_view: None,
            elevation: Some(110.0),
            lat: Some(44.5),
            lon: Some(4.2),
            is_trustable: Some(true),
        }
    }

    fn ids(values: &[i64]) -> HashSet<i64> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_insert_into_empty_ledger() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cameras.csv");

        let outcome = reconcile(&ids(&[7]), &[camera(7, 1, "north-ridge")], &path)?;
        assert_eq!(outcome.inserted_count(), 1);

        let ledger = CameraLedger::load(&path)?;
        assert_eq!(ledger.len(), 1);
        let row = &ledger.rows()[0];
        assert_eq!(row.id, Some(1));
        assert_eq!(row.real_api_id, Some(7));
        assert_eq!(row.organization_id, Some(2));
        assert_eq!(row.name.as_deref(), Some("north-ridge"));
        assert_eq!(row.angle_of_view, Some(54.2));
        assert_eq!(row.elevation, Some(110.0));
        assert_eq!(row.is_trustable, Some(true));

        // lock released
        drop(LedgerLock::acquire(&path)?);
        Ok(())
    }

    #[test]
    fn test_second_call_leaves_file_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cameras.csv");
        let cameras = vec![camera(3, 5, "a"), camera(4, 9, "b")];

        reconcile(&ids(&[3, 4]), &cameras, &path)?;
        let first = std::fs::read(&path)?;

        let outcome = reconcile(&ids(&[3, 4]), &cameras, &path)?;
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert_eq!(std::fs::read(&path)?, first);
        Ok(())
    }

    #[test]
    fn test_organization_remap_is_order_independent() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let forward = dir.path().join("forward.csv");
        reconcile(
            &ids(&[1, 2, 3]),
            &[camera(1, 9, "a"), camera(2, 5, "b"), camera(3, 9, "c")],
            &forward,
        )?;

        let reverse = dir.path().join("reverse.csv");
        reconcile(
            &ids(&[1, 2, 3]),
            &[camera(3, 9, "c"), camera(2, 5, "b"), camera(1, 9, "a")],
            &reverse,
        )?;

        for path in [&forward, &reverse] {
            let ledger = CameraLedger::load(path)?;
            let by_camera: BTreeMap<i64, i64> = ledger
                .rows()
                .iter()
                .map(|row| (row.real_api_id.unwrap(), row.organization_id.unwrap()))
                .collect();
            // 5 -> 2, 9 -> 3
            assert_eq!(by_camera.get(&1), Some(&3));
            assert_eq!(by_camera.get(&2), Some(&2));
            assert_eq!(by_camera.get(&3), Some(&3));
        }
        Ok(())
    }

    #[test]
    fn test_appends_after_existing_ids() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cameras.csv");
        std::fs::write(
            &path,
            "id,organization_id,name,real_api_id,last_active_at\n\
             4,2,old-cam,10,2023-01-01\n\
             9,2,other-cam,11,\n",
        )?;

        let outcome = reconcile(&ids(&[10, 12]), &[camera(12, 2, "new-cam")], &path)?;
        assert_eq!(outcome.inserted_count(), 1);

        let content = std::fs::read_to_string(&path)?;
        let header = content.lines().next().unwrap();
        assert_eq!(
            header,
            "id,organization_id,name,angle_of_view,elevation,lat,lon,is_trustable,real_api_id"
        );

        let ledger = CameraLedger::load(&path)?;
        assert_eq!(ledger.len(), 3);
        let new_row = &ledger.rows()[2];
        assert_eq!(new_row.id, Some(10));
        assert_eq!(new_row.real_api_id, Some(12));
        // Legacy rows get the null marker for the columns they lacked
        assert_eq!(ledger.rows()[0].angle_of_view, None);
        Ok(())
    }

    #[test]
    fn test_unknown_cameras_are_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cameras.csv");

        let outcome = reconcile(&ids(&[40, 41]), &[camera(1, 2, "a")], &path)?;
        assert_eq!(
            outcome,
            ReconcileOutcome::NoMatchingCameras {
                missing: vec![40, 41]
            }
        );
        assert!(!path.exists());

        let outcome = reconcile(&ids(&[1, 41]), &[camera(1, 2, "a")], &path)?;
        assert_eq!(outcome.inserted_count(), 1);
        assert_eq!(outcome.missing(), &[41]);
        Ok(())
    }

    #[test]
    fn test_malformed_ledger_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cameras.csv");
        std::fs::write(&path, "id,lat\n1,44.0\n2,44.0,extra\n")?;

        let result = reconcile(&ids(&[1]), &[camera(1, 2, "a")], &path);
        let err = result.unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Ledger(_))));
        assert_eq!(
            std::fs::read_to_string(&path)?,
            "id,lat\n1,44.0\n2,44.0,extra\n"
        );
        Ok(())
    }

    #[test]
    fn test_concurrent_writer_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cameras.csv");

        let _held = LedgerLock::acquire(&path)?;
        let err = reconcile(&ids(&[1]), &[camera(1, 2, "a")], &path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::LedgerLocked(_))
        ));
        Ok(())
    }

    #[test]
    fn test_leftover_lock_file_is_taken_over() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("c.csv");
        std::fs::write(dir.path().join("c.csv.lock"), "999999\n")?;

        let outcome = reconcile(&ids(&[11]), &[camera(11, 4, "east")], &path)?;
        assert_eq!(outcome.inserted_count(), 1);
        assert_eq!(CameraLedger::load(&path)?.real_api_ids(), ids(&[11]));
        Ok(())
    }

    #[test]
    fn test_remap_recomputes_existing_rows() {
        let mut ledger = CameraLedger::new(vec![
            LocalCameraRow {
                id: Some(1),
                organization_id: Some(2),
                ..Default::default()
            },
            LocalCameraRow {
                id: Some(2),
                organization_id: Some(7),
                ..Default::default()
            },
            LocalCameraRow {
                id: Some(3),
                organization_id: None,
                ..Default::default()
            },
        ]);

        let mapping = ledger.remap_organizations();
        assert_eq!(mapping.len(), 2);
        let orgs: Vec<_> = ledger.rows().iter().map(|r| r.organization_id).collect();
        assert_eq!(orgs, vec![Some(2), Some(3), None]);
    }
}
