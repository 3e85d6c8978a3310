
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn session_create_mints_course_scoped_token() {
    let workspace = temp_dir("rollcall-sessions-token");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "name": "T", "email": "t@teacher.test" }),
    );
    let teacher_id = teacher["teacher"]["id"].as_str().expect("id").to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({ "teacherId": teacher_id, "courseName": "C", "courseCode": "C1" }),
    );
    let course_id = course["course"]["id"].as_str().expect("id").to_string();

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.create",
        json!({
            "courseId": course_id,
            "teacherId": teacher_id,
            "sessionDate": "2025-04-01",
            "sessionTime": "09:30:00",
            "durationMinutes": 60
        }),
    );
    let qr = created["session"]["qrCode"].as_str().expect("qr");
    let prefix = format!("session_{}_", course_id);
    assert!(qr.starts_with(&prefix), "token {} lacks prefix {}", qr, prefix);
    assert!(qr.len() > prefix.len(), "token has no random component");

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.create",
        json!({
            "courseId": course_id,
            "teacherId": teacher_id,
            "sessionDate": "2025-04-01",
            "sessionTime": "09:30:00",
            "durationMinutes": 60
        }),
    );
    assert_ne!(
        again["session"]["qrCode"].as_str(),
        Some(qr),
        "identical sessions must still get distinct tokens"
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn session_crud_validation_and_ownership() {
    let workspace = temp_dir("rollcall-sessions-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let owner = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "teachers.create",
        json!({ "name": "Owner", "email": "owner@teacher.test" }),
    );
    let owner_id = owner["teacher"]["id"].as_str().expect("id").to_string();
    let rival = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({ "name": "Rival", "email": "rival@teacher.test" }),
    );
    let rival_id = rival["teacher"]["id"].as_str().expect("id").to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({ "teacherId": owner_id, "courseName": "C", "courseCode": "C1" }),
    );
    let course_id = course["course"]["id"].as_str().expect("id").to_string();

    // Field validation happens before anything is written.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.create",
        json!({
            "courseId": course_id,
            "teacherId": owner_id,
            "sessionDate": "01/04/2025",
            "sessionTime": "09:30:00"
        }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.create",
        json!({
            "courseId": course_id,
            "teacherId": owner_id,
            "sessionDate": "2025-04-01",
            "sessionTime": "late morning"
        }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "sessions.create",
        json!({
            "courseId": course_id,
            "teacherId": owner_id,
            "sessionDate": "2025-04-01",
            "sessionTime": "09:30:00",
            "durationMinutes": -10
        }),
        "bad_params",
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "sessions.create",
        json!({
            "courseId": course_id,
            "teacherId": rival_id,
            "sessionDate": "2025-04-01",
            "sessionTime": "09:30:00"
        }),
        "not_authorized",
    );

    let s1 = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "sessions.create",
        json!({
            "courseId": course_id,
            "teacherId": owner_id,
            "sessionDate": "2025-04-01",
            "sessionTime": "09:30:00",
            "durationMinutes": 60
        }),
    );
    let s1_id = s1["session"]["id"].as_str().expect("id").to_string();
    let s1_qr = s1["session"]["qrCode"].as_str().expect("qr").to_string();
    let _s2 = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "sessions.create",
        json!({
            "courseId": course_id,
            "teacherId": owner_id,
            "sessionDate": "2025-04-02",
            "sessionTime": "09:30:00"
        }),
    );

    // Newest calendar slot first.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "sessions.listForCourse",
        json!({ "courseId": course_id }),
    );
    let sessions = listed["sessions"].as_array().expect("sessions");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["sessionDate"].as_str(), Some("2025-04-02"));
    assert_eq!(sessions[1]["sessionDate"].as_str(), Some("2025-04-01"));
    assert!(sessions[0]["durationMinutes"].is_null());
    assert_eq!(sessions[1]["durationMinutes"].as_i64(), Some(60));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "sessions.get",
        json!({ "sessionId": s1_id }),
    );
    assert_eq!(fetched["session"]["courseCode"].as_str(), Some("C1"));

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "13",
        "sessions.update",
        json!({
            "sessionId": s1_id,
            "teacherId": rival_id,
            "sessionDate": "2025-04-03",
            "sessionTime": "10:00:00"
        }),
        "not_authorized",
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "sessions.update",
        json!({
            "sessionId": s1_id,
            "teacherId": owner_id,
            "sessionDate": "2025-04-03",
            "sessionTime": "10:00:00",
            "durationMinutes": 90
        }),
    );
    assert_eq!(updated["session"]["sessionDate"].as_str(), Some("2025-04-03"));
    assert_eq!(updated["session"]["durationMinutes"].as_i64(), Some(90));
    assert_eq!(
        updated["session"]["qrCode"].as_str(),
        Some(s1_qr.as_str()),
        "reschedule must not rotate the QR token"
    );

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "15",
        "sessions.delete",
        json!({ "sessionId": s1_id, "teacherId": rival_id }),
        "not_authorized",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "sessions.delete",
        json!({ "sessionId": s1_id, "teacherId": owner_id }),
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "17",
        "sessions.get",
        json!({ "sessionId": s1_id }),
        "not_found",
    );

    let _ = std::fs::remove_dir_all(workspace);
}
