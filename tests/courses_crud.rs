
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn course_lifecycle_with_ownership_checks() {
    let workspace = temp_dir("rollcall-courses-crud");
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
        json!({ "name": "Dr. Smith", "email": "smith@teacher.test", "department": "CS" }),
    );
    let owner_id = owner["teacher"]["id"].as_str().expect("owner id").to_string();
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({ "name": "Dr. Jones", "email": "jones@teacher.test" }),
    );
    let other_id = other["teacher"]["id"].as_str().expect("other id").to_string();

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({
            "teacherId": owner_id,
            "courseName": "Data Structures",
            "courseCode": "CS601",
            "semester": "Spring 2025",
            "batch": "2024",
            "academicSession": "2024-2025"
        }),
    );
    let course_id = created["course"]["id"].as_str().expect("course id").to_string();
    assert_eq!(created["course"]["courseCode"].as_str(), Some("CS601"));

    // Unique code is checked up front.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({
            "teacherId": other_id,
            "courseName": "Copycat",
            "courseCode": "CS601"
        }),
        "duplicate_course_code",
    );

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "courses.create",
        json!({
            "teacherId": "no-such-teacher",
            "courseName": "Ghost",
            "courseCode": "GH1"
        }),
        "not_found",
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.get",
        json!({ "courseId": course_id }),
    );
    assert_eq!(fetched["course"]["teacherName"].as_str(), Some("Dr. Smith"));
    assert_eq!(fetched["course"]["department"].as_str(), Some("CS"));

    let all = request_ok(&mut stdin, &mut reader, "8", "courses.list", json!({}));
    assert_eq!(all["courses"].as_array().expect("courses").len(), 1);

    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "courses.listForTeacher",
        json!({ "teacherId": other_id }),
    );
    assert!(mine["courses"].as_array().expect("courses").is_empty());

    // Update is owner-gated and patch-shaped.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "courses.update",
        json!({
            "courseId": course_id,
            "teacherId": other_id,
            "patch": { "courseName": "Hijacked" }
        }),
        "not_authorized",
    );
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "courses.update",
        json!({
            "courseId": course_id,
            "teacherId": owner_id,
            "patch": { "courseName": "Advanced Data Structures", "semester": null }
        }),
    );
    assert_eq!(
        updated["course"]["courseName"].as_str(),
        Some("Advanced Data Structures")
    );
    assert!(updated["course"]["semester"].is_null());
    assert_eq!(updated["course"]["batch"].as_str(), Some("2024"));

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "courses.delete",
        json!({ "courseId": course_id, "teacherId": other_id }),
        "not_authorized",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "courses.delete",
        json!({ "courseId": course_id, "teacherId": owner_id }),
    );
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "14",
        "courses.get",
        json!({ "courseId": course_id }),
        "not_found",
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn course_delete_cascades_sessions_and_attendance() {
    let workspace = temp_dir("rollcall-courses-cascade");
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
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "name": "S", "email": "s@student.test" }),
    );
    let student_id = student["student"]["id"].as_str().expect("id").to_string();

    let course = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "courses.create",
        json!({ "teacherId": teacher_id, "courseName": "C", "courseCode": "C1" }),
    );
    let course_id = course["course"]["id"].as_str().expect("id").to_string();

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.create",
        json!({
            "courseId": course_id,
            "teacherId": teacher_id,
            "sessionDate": today,
            "sessionTime": "00:00:00",
            "durationMinutes": 2880
        }),
    );
    let session_id = session["session"]["id"].as_str().expect("id").to_string();
    let qr = session["session"]["qrCode"].as_str().expect("qr").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.mark",
        json!({ "qrToken": qr, "studentId": student_id }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "courses.delete",
        json!({ "courseId": course_id, "teacherId": teacher_id }),
    );

    let _ = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "sessions.get",
        json!({ "sessionId": session_id }),
        "not_found",
    );
    // The token dies with its session.
    let _ = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.mark",
        json!({ "qrToken": qr, "studentId": student_id }),
        "invalid_qr",
    );

    let _ = std::fs::remove_dir_all(workspace);
}
