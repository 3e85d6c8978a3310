use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::courses::owned_course;
use crate::ipc::handlers::sessions::find_session_by_token;
use crate::ipc::types::{AppState, Request};
use crate::window::{self, Rejection};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn query_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

#[derive(Debug, Clone)]
struct AttendanceRow {
    id: String,
    session_id: String,
    student_id: String,
    status: String,
    marked_at: String,
}

impl AttendanceRow {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "sessionId": self.session_id,
            "studentId": self.student_id,
            "status": self.status,
            "markedAt": self.marked_at
        })
    }
}

fn find_attendance(
    conn: &Connection,
    session_id: &str,
    student_id: &str,
) -> Result<Option<AttendanceRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, session_id, student_id, status, marked_at
         FROM attendance
         WHERE session_id = ? AND student_id = ?",
        (session_id, student_id),
        |r| {
            Ok(AttendanceRow {
                id: r.get(0)?,
                session_id: r.get(1)?,
                student_id: r.get(2)?,
                status: r.get(3)?,
                marked_at: r.get(4)?,
            })
        },
    )
    .optional()
    .map_err(query_failed)
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(query_failed)
}

fn already_marked(existing: &AttendanceRow) -> HandlerErr {
    HandlerErr {
        code: "already_marked",
        message: "attendance already marked for this session".to_string(),
        details: Some(json!({ "attendance": existing.to_json() })),
    }
}

/// The marking protocol: resolve token, check the derived window against a
/// fresh "now", reject duplicates, insert. The UNIQUE(session_id, student_id)
/// index stays authoritative for the at-most-once guarantee; the pre-check
/// only exists to hand back the earlier record.
fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let qr_token = get_required_str(params, "qrToken")?;
    let student_id = get_required_str(params, "studentId")?;

    let Some(session) = find_session_by_token(conn, &qr_token).map_err(query_failed)? else {
        return Err(HandlerErr {
            code: "invalid_qr",
            message: "invalid QR code".to_string(),
            details: None,
        });
    };

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    }

    let win = window::session_window(
        &session.session_date,
        &session.session_time,
        session.duration_minutes,
    )
    .map_err(|e| HandlerErr {
        code: "bad_params",
        message: e.message,
        details: None,
    })?;

    if let Err(rejection) = window::check(&win, Utc::now()) {
        return Err(match rejection {
            Rejection::Expired { expired_at } => HandlerErr {
                code: "qr_expired",
                message: "QR code has expired".to_string(),
                details: Some(json!({ "expiredAt": window::format_instant(&expired_at) })),
            },
            Rejection::NotStarted { starts_at } => HandlerErr {
                code: "session_not_started",
                message: "session has not started yet".to_string(),
                details: Some(json!({ "startsAt": window::format_instant(&starts_at) })),
            },
            Rejection::WrongDate { session_date } => HandlerErr {
                code: "wrong_session_date",
                message: "QR code is only valid on the session date".to_string(),
                details: Some(json!({ "sessionDate": window::format_date(&session_date) })),
            },
        });
    }

    if let Some(existing) = find_attendance(conn, &session.id, &student_id)? {
        return Err(already_marked(&existing));
    }

    let record = AttendanceRow {
        id: Uuid::new_v4().to_string(),
        session_id: session.id.clone(),
        student_id: student_id.clone(),
        status: "present".to_string(),
        marked_at: db::now_stamp(),
    };
    if let Err(e) = conn.execute(
        "INSERT INTO attendance(id, session_id, student_id, status, marked_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.session_id,
            &record.student_id,
            &record.status,
            &record.marked_at,
        ),
    ) {
        // A concurrent writer may have won the race between the pre-check
        // and this insert; the surviving row is the answer, not a failure.
        if db::is_unique_violation(&e) {
            if let Some(existing) = find_attendance(conn, &session.id, &student_id)? {
                return Err(already_marked(&existing));
            }
        }
        return Err(HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance" })),
        });
    }

    let course = conn
        .query_row(
            "SELECT course_name, course_code FROM courses WHERE id = ?",
            [&session.course_id],
            |r| {
                Ok(json!({
                    "courseName": r.get::<_, String>(0)?,
                    "courseCode": r.get::<_, String>(1)?
                }))
            },
        )
        .map_err(query_failed)?;

    Ok(json!({
        "attendance": record.to_json(),
        "session": {
            "id": session.id,
            "date": session.session_date,
            "time": session.session_time
        },
        "course": course
    }))
}

fn attendance_list_for_session(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let row = conn
        .query_row(
            "SELECT s.id, s.course_id, s.session_date, s.session_time, s.duration_minutes,
                    s.qr_code, c.teacher_id, c.course_name, c.course_code
             FROM sessions s
             JOIN courses c ON s.course_id = c.id
             WHERE s.id = ?",
            [&session_id],
            |r| {
                Ok((
                    json!({
                        "id": r.get::<_, String>(0)?,
                        "courseId": r.get::<_, String>(1)?,
                        "sessionDate": r.get::<_, String>(2)?,
                        "sessionTime": r.get::<_, String>(3)?,
                        "durationMinutes": r.get::<_, Option<i64>>(4)?,
                        "qrCode": r.get::<_, String>(5)?,
                        "courseName": r.get::<_, String>(7)?,
                        "courseCode": r.get::<_, String>(8)?
                    }),
                    r.get::<_, String>(6)?,
                ))
            },
        )
        .optional()
        .map_err(query_failed)?;

    let Some((session, owner)) = row else {
        return Err(HandlerErr {
            code: "not_found",
            message: "session not found".to_string(),
            details: None,
        });
    };
    if owner != teacher_id {
        return Err(HandlerErr {
            code: "not_authorized",
            message: "not authorized to view this attendance".to_string(),
            details: None,
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.session_id, a.student_id, a.status, a.marked_at,
                    st.name, st.email, st.roll_number, st.batch
             FROM attendance a
             JOIN students st ON a.student_id = st.id
             WHERE a.session_id = ?
             ORDER BY a.marked_at DESC",
        )
        .map_err(query_failed)?;
    let records = stmt
        .query_map([&session_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "sessionId": r.get::<_, String>(1)?,
                "studentId": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "markedAt": r.get::<_, String>(4)?,
                "studentName": r.get::<_, String>(5)?,
                "email": r.get::<_, String>(6)?,
                "rollNumber": r.get::<_, Option<String>>(7)?,
                "batch": r.get::<_, Option<String>>(8)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let total_present = records.len();
    Ok(json!({
        "session": session,
        "attendance": records,
        "totalPresent": total_present
    }))
}

fn attendance_list_for_course(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let course = owned_course(conn, &course_id, &teacher_id).map_err(|(code, message)| HandlerErr {
        code,
        message,
        details: None,
    })?;

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.session_id, a.student_id, a.status, a.marked_at,
                    st.name, st.email, st.roll_number, st.batch,
                    ses.session_date, ses.session_time
             FROM attendance a
             JOIN students st ON a.student_id = st.id
             JOIN sessions ses ON a.session_id = ses.id
             WHERE ses.course_id = ?
             ORDER BY ses.session_date DESC, ses.session_time DESC, a.marked_at DESC",
        )
        .map_err(query_failed)?;
    let records = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "sessionId": r.get::<_, String>(1)?,
                "studentId": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "markedAt": r.get::<_, String>(4)?,
                "studentName": r.get::<_, String>(5)?,
                "email": r.get::<_, String>(6)?,
                "rollNumber": r.get::<_, Option<String>>(7)?,
                "batch": r.get::<_, Option<String>>(8)?,
                "sessionDate": r.get::<_, String>(9)?,
                "sessionTime": r.get::<_, String>(10)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let total_records = records.len();
    Ok(json!({
        "course": course,
        "attendance": records,
        "totalRecords": total_records
    }))
}

/// Shared gate for the per-student read paths: a student sees only their own
/// rows; a teacher sees any student, but only inside a course they own.
pub fn authorize_student_read(
    conn: &Connection,
    params: &serde_json::Value,
    student_id: &str,
    course_id: &str,
) -> Result<(), (&'static str, String)> {
    let role = params
        .get("requesterRole")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let requester_id = params
        .get("requesterId")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    match role {
        "student" => {
            if requester_id != student_id {
                return Err((
                    "not_authorized",
                    "not authorized to view other student attendance".to_string(),
                ));
            }
            Ok(())
        }
        "teacher" => owned_course(conn, course_id, requester_id).map(|_| ()),
        _ => Err((
            "bad_params",
            "requesterRole must be teacher or student".to_string(),
        )),
    }
}

fn find_student_json(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    conn.query_row(
        "SELECT id, name, email, roll_number, batch FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "rollNumber": r.get::<_, Option<String>>(3)?,
                "batch": r.get::<_, Option<String>>(4)?
            }))
        },
    )
    .optional()
    .map_err(query_failed)
}

fn attendance_list_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;

    authorize_student_read(conn, params, &student_id, &course_id).map_err(
        |(code, message)| HandlerErr {
            code,
            message,
            details: None,
        },
    )?;

    let Some(student) = find_student_json(conn, &student_id)? else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.session_id, a.status, a.marked_at,
                    ses.session_date, ses.session_time, c.course_name, c.course_code
             FROM attendance a
             JOIN sessions ses ON a.session_id = ses.id
             JOIN courses c ON ses.course_id = c.id
             WHERE a.student_id = ? AND ses.course_id = ?
             ORDER BY ses.session_date DESC, ses.session_time DESC",
        )
        .map_err(query_failed)?;
    let records = stmt
        .query_map((&student_id, &course_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "sessionId": r.get::<_, String>(1)?,
                "status": r.get::<_, String>(2)?,
                "markedAt": r.get::<_, String>(3)?,
                "sessionDate": r.get::<_, String>(4)?,
                "sessionTime": r.get::<_, String>(5)?,
                "courseName": r.get::<_, String>(6)?,
                "courseCode": r.get::<_, String>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let total_attended = records.len();
    Ok(json!({
        "student": student,
        "attendance": records,
        "totalAttended": total_attended
    }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.listForSession" => Some(with_conn(state, req, attendance_list_for_session)),
        "attendance.listForCourse" => Some(with_conn(state, req, attendance_list_for_course)),
        "attendance.listForStudent" => Some(with_conn(state, req, attendance_list_for_student)),
        _ => None,
    }
}
