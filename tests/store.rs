use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use bdns_harvester::domain::{FlattenedRow, GrantRecord};
use bdns_harvester::error::HarvestError;
use bdns_harvester::flatten::flatten;
use bdns_harvester::store::PartitionStore;

fn temp_store() -> (tempfile::TempDir, PartitionStore) {
    let temp = tempfile::tempdir().unwrap();
    let data_dir = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
    let store = PartitionStore::new(data_dir);
    (temp, store)
}

fn rows_for(codigo: u64, date: &str, sectors: &[&str]) -> Vec<FlattenedRow> {
    let sectores: Vec<_> = sectors
        .iter()
        .map(|name| serde_json::json!({"descripcion": name}))
        .collect();
    let record: GrantRecord = serde_json::from_value(serde_json::json!({
        "codigoBDNS": codigo,
        "fechaRecepcion": date,
        "descripcion": format!("convocatoria {codigo}"),
        "presupuestoTotal": 1000.5,
        "abierto": true,
        "organo": {"nivel1": "ESTADO"},
        "sectores": sectores,
        "regiones": [{"descripcion": "MADRID"}]
    }))
    .unwrap();
    flatten(&record).unwrap()
}

#[test]
fn append_then_load_round_trips() {
    let (_temp, store) = temp_store();
    let rows = rows_for(100, "2024-03-01", &["Educación", "Cultura"]);
    store.append(2024, &rows).unwrap();

    let loaded = store.load(None).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded, rows);
    assert_eq!(store.list_years().unwrap(), vec![2024]);
}

#[test]
fn append_is_idempotent_for_identical_rows() {
    let (_temp, store) = temp_store();
    let rows = rows_for(100, "2024-03-01", &["Educación", "Cultura"]);
    store.append(2024, &rows).unwrap();
    store.append(2024, &rows).unwrap();

    let loaded = store.load(Some(&[2024])).unwrap();
    assert_eq!(loaded.len(), 2);
}

#[test]
fn append_keeps_distinct_rows_of_the_same_identifier() {
    let (_temp, store) = temp_store();
    store
        .append(2024, &rows_for(100, "2024-03-01", &["Educación"]))
        .unwrap();
    store
        .append(2024, &rows_for(100, "2024-03-01", &["Cultura"]))
        .unwrap();

    let loaded = store.load(None).unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.iter().all(|row| row.codigo_bdns == 100));
}

#[test]
fn load_without_partitions_is_data_unavailable() {
    let (_temp, store) = temp_store();
    let err = store.load(None).unwrap_err();
    assert_matches!(err, HarvestError::DataUnavailable(_));
}

#[test]
fn load_selects_requested_years() {
    let (_temp, store) = temp_store();
    store
        .append(2023, &rows_for(50, "2023-11-20", &["Deporte"]))
        .unwrap();
    store
        .append(2024, &rows_for(100, "2024-03-01", &["Educación"]))
        .unwrap();

    let only_2023 = store.load(Some(&[2023])).unwrap();
    assert_eq!(only_2023.len(), 1);
    assert_eq!(only_2023[0].year, 2023);

    let both = store.load(None).unwrap();
    assert_eq!(both.len(), 2);

    // A requested year with no partition is skipped as long as
    // something else exists.
    let sparse = store.load(Some(&[2023, 1999])).unwrap();
    assert_eq!(sparse.len(), 1);

    let err = store.load(Some(&[1999])).unwrap_err();
    assert_matches!(err, HarvestError::DataUnavailable(_));
}

#[test]
fn deduplicate_is_idempotent() {
    let (_temp, store) = temp_store();
    let rows = rows_for(100, "2024-03-01", &["Educación"]);
    let mut doubled = rows.clone();
    doubled.extend(rows.clone());
    store.append(2024, &doubled).unwrap();

    let first = store.deduplicate(2024).unwrap();
    // Append already dropped the duplicates on the way in.
    assert_eq!(first.rows_before, 1);
    assert_eq!(first.rows_after, 1);

    let second = store.deduplicate(2024).unwrap();
    assert_eq!(second.rows_before, first.rows_after);
    assert_eq!(second.rows_after, first.rows_after);
}

#[test]
fn deduplicate_missing_partition_fails() {
    let (_temp, store) = temp_store();
    let err = store.deduplicate(2024).unwrap_err();
    assert_matches!(err, HarvestError::PartitionMissing(_));
}

#[test]
fn bdns_ids_span_all_partitions() {
    let (_temp, store) = temp_store();
    store
        .append(2023, &rows_for(50, "2023-11-20", &["Deporte"]))
        .unwrap();
    store
        .append(2024, &rows_for(100, "2024-03-01", &["Educación", "Cultura"]))
        .unwrap();

    let mut ids: Vec<u64> = store
        .bdns_ids()
        .unwrap()
        .into_iter()
        .map(|id| id.value())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids, vec![50, 100]);
}

#[test]
fn optional_fields_survive_the_round_trip() {
    let (_temp, store) = temp_store();
    let record: GrantRecord = serde_json::from_value(serde_json::json!({
        "codigoBDNS": 7,
        "fechaRecepcion": "2024-06-30",
        "fechaInicioSolicitud": "2024-07-01",
        "sectores": [{"codigo": "32", "descripcion": "Educación"}]
    }))
    .unwrap();
    let rows = flatten(&record).unwrap();
    store.append(2024, &rows).unwrap();

    let loaded = store.load(None).unwrap();
    assert_eq!(loaded.len(), 1);
    let row = &loaded[0];
    assert_eq!(row.sector_codigo.as_deref(), Some("32"));
    assert_eq!(
        row.fecha_inicio_solicitud.map(|d| d.to_string()),
        Some("2024-07-01".to_string())
    );
    assert!(row.fecha_fin_solicitud.is_none());
    assert!(row.presupuesto_total.is_none());
    assert!(row.descripcion.is_none());
}
