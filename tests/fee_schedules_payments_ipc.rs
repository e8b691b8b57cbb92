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
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn installment_sum(schedule: &serde_json::Value) -> i64 {
    schedule["installments"]
        .as_array()
        .expect("installments")
        .iter()
        .map(|i| i["paidAmount"].as_i64().unwrap_or_default())
        .sum()
}

#[test]
fn payments_roll_up_into_schedule_totals() {
    let workspace = temp_dir("schoold-fees-rollup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "feeSchedules.create",
        json!({
            "studentId": "stu-42",
            "feeType": "tuition",
            "schoolYear": "2024-2025",
            "installments": [
                { "label": "Rentree", "amount": 50000, "dueDate": "2024-09-15" },
                { "label": "Janvier", "amount": 30000, "dueDate": "2025-01-15" },
                { "amount": 20000 }
            ]
        }),
    );
    let schedule = &created["schedule"];
    let schedule_id = schedule["id"].as_str().expect("schedule id").to_string();
    assert_eq!(schedule["totalAmount"], 100000);
    assert_eq!(schedule["paidAmount"], 0);
    assert_eq!(schedule["status"], "in_progress");
    assert_eq!(schedule["installments"][2]["label"], "Installment 3");
    assert_eq!(schedule["installments"][0]["status"], "pending");
    let inst: Vec<String> = schedule["installments"]
        .as_array()
        .expect("installments")
        .iter()
        .map(|i| i["id"].as_str().expect("installment id").to_string())
        .collect();

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "payments.record",
        json!({ "installmentId": inst[0], "amount": 20000, "method": "mobileMoney" }),
    );
    assert_eq!(paid["balance"]["newPaid"], 20000);
    assert_eq!(paid["balance"]["newRemaining"], 30000);
    assert_eq!(paid["balance"]["status"], "partial");
    assert_eq!(paid["installment"]["status"], "partial");
    assert_eq!(paid["schedule"]["status"], "partial");
    assert_eq!(paid["payment"]["currency"], "FCFA");
    let first_receipt = paid["payment"]["receiptNumber"]
        .as_str()
        .expect("receipt")
        .to_string();

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payments.record",
        json!({ "installmentId": inst[0], "amount": 30000 }),
    );
    assert_eq!(paid["installment"]["status"], "paid");
    let second_receipt = paid["payment"]["receiptNumber"]
        .as_str()
        .expect("receipt")
        .to_string();
    assert!(first_receipt.starts_with("REC-"));
    assert!(first_receipt.ends_with("-000001"), "{}", first_receipt);
    assert!(second_receipt.ends_with("-000002"), "{}", second_receipt);

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "payments.record",
        json!({ "installmentId": inst[2], "amount": 5000, "method": "cash" }),
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "feeSchedules.get",
        json!({ "scheduleId": schedule_id }),
    );
    let s = &fetched["schedule"];
    assert_eq!(s["paidAmount"].as_i64(), Some(installment_sum(s)));
    assert_eq!(s["paidAmount"], 55000);
    assert_eq!(s["remainingAmount"], 45000);
    assert_eq!(s["status"], "partial");

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "payments.record",
        json!({ "installmentId": inst[1], "amount": 30000, "method": "bankTransfer" }),
    );
    let done = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "payments.record",
        json!({ "installmentId": inst[2], "amount": 15000 }),
    );
    assert_eq!(done["schedule"]["status"], "completed");
    assert_eq!(done["schedule"]["remainingAmount"], 0);
    assert_eq!(done["schedule"]["paidAmount"].as_i64(), Some(installment_sum(&done["schedule"])));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "payments.list",
        json!({ "scheduleId": schedule_id }),
    );
    let payments = listed["payments"].as_array().expect("payments");
    assert_eq!(payments.len(), 5);
    let total: i64 = payments.iter().map(|p| p["amount"].as_i64().unwrap_or_default()).sum();
    assert_eq!(total, 100000);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_payments_leave_the_ledger_untouched() {
    let workspace = temp_dir("schoold-fees-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "feeSchedules.create",
        json!({
            "studentId": "stu-7",
            "feeType": "canteen",
            "schoolYear": "2024-2025",
            "installments": [{ "label": "Only", "amount": 1000 }]
        }),
    );
    let schedule_id = created["schedule"]["id"].as_str().expect("id").to_string();
    let inst = created["schedule"]["installments"][0]["id"]
        .as_str()
        .expect("installment id")
        .to_string();

    let over = request(
        &mut stdin,
        &mut reader,
        "3",
        "payments.record",
        json!({ "installmentId": inst, "amount": 1500 }),
    );
    assert_eq!(over["error"]["code"], "invalid_amount");
    assert!(over["error"]["message"]
        .as_str()
        .unwrap_or_default()
        .contains("1000"));

    for (i, amount) in [0, -20].iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("z{}", i),
            "payments.record",
            json!({ "installmentId": inst, "amount": amount }),
        );
        assert_eq!(resp["error"]["code"], "invalid_amount");
    }

    let fractional = request(
        &mut stdin,
        &mut reader,
        "4",
        "payments.record",
        json!({ "installmentId": inst, "amount": 10.5 }),
    );
    assert_eq!(fractional["error"]["code"], "bad_params");

    let bad_method = request(
        &mut stdin,
        &mut reader,
        "5",
        "payments.record",
        json!({ "installmentId": inst, "amount": 10, "method": "barter" }),
    );
    assert_eq!(bad_method["error"]["code"], "bad_params");

    let missing = request(
        &mut stdin,
        &mut reader,
        "6",
        "payments.record",
        json!({ "installmentId": "nope", "amount": 10 }),
    );
    assert_eq!(missing["error"]["code"], "not_found");

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "feeSchedules.get",
        json!({ "scheduleId": schedule_id }),
    );
    assert_eq!(fetched["schedule"]["paidAmount"], 0);
    assert_eq!(fetched["schedule"]["status"], "in_progress");
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "payments.list",
        json!({ "scheduleId": schedule_id }),
    );
    assert_eq!(listed["payments"].as_array().map(|a| a.len()), Some(0));

    // Full payment in one step.
    let full = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "payments.record",
        json!({ "installmentId": inst, "amount": 1000 }),
    );
    assert_eq!(full["installment"]["status"], "paid");
    assert_eq!(full["schedule"]["status"], "completed");

    let after = request(
        &mut stdin,
        &mut reader,
        "10",
        "payments.record",
        json!({ "installmentId": inst, "amount": 1 }),
    );
    assert_eq!(after["error"]["code"], "invalid_amount");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn fee_schedule_creation_validates_and_lists() {
    let workspace = temp_dir("schoold-fees-create");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let bad = request(
        &mut stdin,
        &mut reader,
        "2",
        "feeSchedules.create",
        json!({
            "studentId": "stu-1",
            "feeType": "tuition",
            "schoolYear": "2024-2025",
            "installments": [{ "amount": 0 }, { "amount": 100, "dueDate": "15/01/2025" }]
        }),
    );
    assert_eq!(bad["error"]["code"], "validation_failed");
    assert_eq!(bad["error"]["details"]["fields"].as_array().map(|a| a.len()), Some(2));

    let empty = request(
        &mut stdin,
        &mut reader,
        "3",
        "feeSchedules.create",
        json!({ "studentId": "stu-1", "feeType": "tuition", "schoolYear": "2024-2025", "installments": [] }),
    );
    assert_eq!(empty["error"]["code"], "bad_params");

    let unordered = request(
        &mut stdin,
        &mut reader,
        "4",
        "feeSchedules.create",
        json!({
            "studentId": "stu-1",
            "feeType": "tuition",
            "schoolYear": "2024-2025",
            "installments": [
                { "amount": 100, "dueDate": "2025-01-15" },
                { "amount": 100, "dueDate": "2024-09-15" }
            ]
        }),
    );
    assert_eq!(unordered["error"]["code"], "validation_failed");

    let one = json!({
        "studentId": "stu-1",
        "feeType": "tuition",
        "schoolYear": "2024-2025",
        "installments": [{ "amount": 100 }]
    });
    request_ok(&mut stdin, &mut reader, "5", "feeSchedules.create", one.clone());
    let dup = request(&mut stdin, &mut reader, "6", "feeSchedules.create", one);
    assert_eq!(dup["error"]["code"], "already_exists");

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "feeSchedules.create",
        json!({
            "studentId": "stu-2",
            "feeType": "tuition",
            "schoolYear": "2024-2025",
            "installments": [{ "amount": 200 }]
        }),
    );

    let all = request_ok(&mut stdin, &mut reader, "8", "feeSchedules.list", json!({}));
    assert_eq!(all["schedules"].as_array().map(|a| a.len()), Some(2));
    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "feeSchedules.list",
        json!({ "studentId": "stu-2" }),
    );
    assert_eq!(mine["schedules"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(mine["schedules"][0]["totalAmount"], 200);

    let missing = request(
        &mut stdin,
        &mut reader,
        "10",
        "feeSchedules.get",
        json!({ "scheduleId": "nope" }),
    );
    assert_eq!(missing["error"]["code"], "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn oversized_amounts_are_refused_before_anything_is_stored() {
    let workspace = temp_dir("schoold-fees-limits");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let huge = request(
        &mut stdin,
        &mut reader,
        "2",
        "feeSchedules.create",
        json!({
            "studentId": "stu-1",
            "feeType": "tuition",
            "schoolYear": "2024-2025",
            "installments": [{ "amount": i64::MAX }, { "amount": i64::MAX }]
        }),
    );
    assert_eq!(huge["error"]["code"], "validation_failed");
    assert_eq!(
        huge["error"]["details"]["fields"][0]["field"],
        "installments[0].amount"
    );

    // Each installment fits, their sum does not.
    let ceiling: i64 = 1_000_000_000_000_000;
    let summed = request(
        &mut stdin,
        &mut reader,
        "3",
        "feeSchedules.create",
        json!({
            "studentId": "stu-1",
            "feeType": "tuition",
            "schoolYear": "2024-2025",
            "installments": [{ "amount": ceiling }, { "amount": 1 }]
        }),
    );
    assert_eq!(summed["error"]["code"], "validation_failed");
    assert_eq!(summed["error"]["details"]["fields"][0]["field"], "installments");

    let none = request_ok(&mut stdin, &mut reader, "4", "feeSchedules.list", json!({}));
    assert_eq!(none["schedules"].as_array().map(|a| a.len()), Some(0));

    let at_limit = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "feeSchedules.create",
        json!({
            "studentId": "stu-1",
            "feeType": "tuition",
            "schoolYear": "2024-2025",
            "installments": [{ "amount": ceiling - 1 }, { "amount": 1 }]
        }),
    );
    assert_eq!(at_limit["schedule"]["totalAmount"], ceiling);
    let installment_id = at_limit["schedule"]["installments"][0]["id"]
        .as_str()
        .expect("installment id")
        .to_string();

    for (i, amount) in [json!(i64::MAX), json!(u64::MAX), json!(1e20)].iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("p{}", i),
            "payments.record",
            json!({ "installmentId": installment_id, "amount": amount }),
        );
        assert_eq!(resp["error"]["code"], "bad_params", "amount {}", amount);
    }

    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "payments.record",
        json!({ "installmentId": installment_id, "amount": ceiling - 1 }),
    );
    assert_eq!(paid["schedule"]["paidAmount"], ceiling - 1);
    assert_eq!(paid["schedule"]["remainingAmount"], 1);

    let health = request_ok(&mut stdin, &mut reader, "7", "health", json!({}));
    assert!(health["workspacePath"].is_string());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
