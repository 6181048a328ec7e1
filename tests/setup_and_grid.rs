use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .cloned()
            .unwrap_or_else(|| json!({ "message": "unknown error" }))
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn seed_school(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let records = [
        ("classes.upsert", json!({ "id": "c1", "name": "X TKJ 1", "department": "TKJ", "level": "X" })),
        ("classes.upsert", json!({ "id": "c2", "name": "X TKJ 2", "department": "TKJ", "level": "X" })),
        ("classes.upsert", json!({ "id": "c3", "name": "X AKL 1", "department": "AKL", "level": "X" })),
        (
            "classes.upsert",
            json!({
                "id": "combo",
                "name": "X TKJ Gabungan",
                "level": "X",
                "isCombined": true,
                "combinedClassIds": ["c1", "c2"]
            }),
        ),
        ("subjects.upsert", json!({ "id": "s1", "name": "Matematika", "levelTarget": "X", "group": "Umum" })),
        ("subjects.upsert", json!({ "id": "s2", "name": "Dasar Kejuruan", "levelTarget": "X", "group": "Kejuruan" })),
        ("rooms.upsert", json!({ "id": "r1", "name": "R.01", "type": "teori" })),
        ("rooms.upsert", json!({ "id": "r2", "name": "Lab Komputer", "type": "lab" })),
        ("timeslots.upsert", json!({ "id": "t1", "day": "Senin", "startTime": "07:00", "endTime": "07:45", "sessionNumber": 1 })),
        ("timeslots.upsert", json!({ "id": "t2", "day": "Senin", "startTime": "07:45", "endTime": "08:30", "sessionNumber": 2 })),
        ("timeslots.upsert", json!({ "id": "t3", "day": "Selasa", "startTime": "07:00", "endTime": "07:45", "sessionNumber": 1 })),
        ("timeslots.upsert", json!({ "id": "brk", "day": "Senin", "startTime": "08:30", "endTime": "09:00", "isBreak": true })),
        (
            "timeslots.upsert",
            json!({ "id": "upc", "day": "Senin", "startTime": "06:30", "endTime": "07:00", "label": "UPACARA/PEMBINAAN" }),
        ),
        (
            "teachers.upsert",
            json!({
                "id": "g1",
                "name": "Bu Sari",
                "subjectIds": ["s1", "s2"],
                "classIds": ["c1", "c2", "c3", "combo"],
                "availableTimeSlotIds": ["t1", "t2", "t3"]
            }),
        ),
        (
            "teachers.upsert",
            json!({
                "id": "g2",
                "name": "Pak Budi",
                "subjectIds": ["s1"],
                "classIds": ["c1", "c2"],
                "availableTimeSlotIds": ["t1", "t2", "t3"]
            }),
        ),
    ];
    for (i, (method, record)) in records.iter().enumerate() {
        request_ok(
            stdin,
            reader,
            &format!("seed-{}", i),
            method,
            json!({ "record": record }),
        );
    }
}

fn open_seeded(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_school(&mut stdin, &mut reader);
    (child, stdin, reader)
}

fn create(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    class_id: &str,
    slot: &str,
    subject: &str,
    teacher: &str,
    room: &str,
) -> serde_json::Value {
    request(
        stdin,
        reader,
        id,
        "schedule.create",
        json!({
            "classId": class_id,
            "timeSlotId": slot,
            "subjectId": subject,
            "teacherId": teacher,
            "roomId": room
        }),
    )
}

#[test]
fn setup_sections_validate_and_persist() {
    let (mut child, mut stdin, mut reader) = open_seeded("timetabled-setup-sections");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({ "section": "grid", "patch": { "showEmptyDays": true, "defaultFilter": "Room" } }),
    );
    assert_eq!(updated["section"], json!("grid"));
    assert_eq!(updated["values"]["defaultFilter"], json!("room"));

    let bad = [
        json!({ "section": "reports", "patch": {} }),
        json!({ "section": "generation", "patch": { "maxEntries": 0 } }),
        json!({ "section": "generation", "patch": { "maxEntries": "many" } }),
        json!({ "section": "placement", "patch": { "enforceEligibility": "yes" } }),
        json!({ "section": "placement", "patch": { "strict": true } }),
        json!({ "section": "grid" }),
    ];
    for (i, params) in bad.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("bad-{}", i), "setup.update", params.clone());
        assert_eq!(error_code(&resp), "bad_params", "case {}: {}", i, resp);
    }

    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["grid"]["showEmptyDays"], json!(true));
    assert_eq!(setup["grid"]["defaultFilter"], json!("room"));
    assert_eq!(setup["generation"]["maxEntries"], json!(5000));

    let school = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "school.update",
        json!({ "patch": { "headmasterName": " Drs. Hartono ", "logoUrl": "https://example.org/logo.png" } }),
    );
    assert_eq!(school["school"]["headmasterName"], json!("Drs. Hartono"));
    let bad_logo = request(
        &mut stdin,
        &mut reader,
        "4",
        "school.update",
        json!({ "patch": { "logoUrl": "ftp://example.org/logo.png" } }),
    );
    assert_eq!(error_code(&bad_logo), "bad_params");
    let school = request_ok(&mut stdin, &mut reader, "5", "school.get", json!({}));
    assert_eq!(school["school"]["logoUrl"], json!("https://example.org/logo.png"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn eligibility_is_enforced_only_when_enabled() {
    let (mut child, mut stdin, mut reader) = open_seeded("timetabled-setup-eligibility");

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "subjects.upsert",
        json!({ "record": { "id": "s3", "name": "Akuntansi Lanjut", "levelTarget": "XI", "group": "Kejuruan" } }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "timeslots.upsert",
        json!({ "record": { "id": "t4", "day": "Selasa", "startTime": "07:45", "endTime": "08:30", "sessionNumber": 2 } }),
    );

    let lenient = create(&mut stdin, &mut reader, "3", "c3", "t1", "s1", "g2", "r2");
    assert_eq!(lenient["ok"], json!(true), "{}", lenient);
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.clear",
        json!({}),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "placement", "patch": { "enforceEligibility": true } }),
    );

    let cases = [
        (("c1", "t1", "s3", "g1"), "subject_level_mismatch"),
        (("c1", "t1", "s2", "g2"), "teacher_not_qualified"),
        (("c3", "t1", "s1", "g2"), "teacher_not_assigned_to_class"),
        (("c1", "t4", "s1", "g1"), "teacher_unavailable"),
    ];
    for (i, ((class_id, slot, subject, teacher), reason)) in cases.iter().enumerate() {
        let resp = create(&mut stdin, &mut reader, &format!("e-{}", i), class_id, slot, subject, teacher, "r1");
        assert_eq!(error_code(&resp), "conflict", "case {}: {}", i, resp);
        assert_eq!(resp["error"]["details"]["reason"], json!(reason));
        assert_eq!(resp["error"]["details"]["conflictingEntryId"], serde_json::Value::Null);
    }

    let eligible = create(&mut stdin, &mut reader, "6", "combo", "t1", "s2", "g1", "r1");
    assert_eq!(eligible["ok"], json!(true), "{}", eligible);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn grid_expands_combined_classes_per_member() {
    let (mut child, mut stdin, mut reader) = open_seeded("timetabled-setup-grid");

    let combined = create(&mut stdin, &mut reader, "1", "combo", "t1", "s1", "g1", "r1");
    let combined_id = combined["result"]["entry"]["id"].clone();
    let single = create(&mut stdin, &mut reader, "2", "c3", "t3", "s1", "g2", "r2");
    assert_eq!(single["ok"], json!(true), "{}", single);

    let grid = request_ok(&mut stdin, &mut reader, "3", "schedule.grid", json!({}));
    assert_eq!(grid["filter"]["kind"], json!("class"));
    let columns: Vec<&str> = grid["columns"]
        .as_array()
        .expect("columns")
        .iter()
        .filter_map(|c| c["name"].as_str())
        .collect();
    assert_eq!(columns, vec!["X AKL 1", "X TKJ 1", "X TKJ 2"]);
    let days: Vec<&str> = grid["days"]
        .as_array()
        .expect("days")
        .iter()
        .filter_map(|d| d["day"].as_str())
        .collect();
    assert_eq!(days, vec!["monday", "tuesday"]);
    assert_eq!(grid["rows"].as_array().map(|a| a.len()), Some(3));

    let c2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.grid",
        json!({ "filter": { "kind": "class", "id": "c2" } }),
    );
    let rows = c2["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["entryId"], combined_id);
    assert_eq!(rows[0]["effectiveClassId"], json!("c2"));
    assert_eq!(rows[0]["originalClassId"], json!("combo"));
    assert_eq!(rows[0]["viaCombined"], json!(true));

    let by_room = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.grid",
        json!({ "filter": { "kind": "room", "id": "r2" } }),
    );
    let rows = by_room["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["viaCombined"], json!(false));

    let bad = request(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.grid",
        json!({ "filter": { "kind": "subject" } }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({ "section": "grid", "patch": { "showEmptyDays": true } }),
    );
    let full = request_ok(&mut stdin, &mut reader, "8", "schedule.grid", json!({}));
    assert_eq!(full["days"].as_array().map(|a| a.len()), Some(6));

    drop(stdin);
    let _ = child.wait();
}
