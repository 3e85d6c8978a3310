use crate::ipc::error::{err, ok};
use crate::ipc::handlers::attendance::authorize_student_read;
use crate::ipc::handlers::courses::owned_course;
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn course_sessions(conn: &Connection, course_id: &str) -> Result<Vec<stats::SessionRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, session_date, session_time
             FROM sessions
             WHERE course_id = ?
             ORDER BY session_date DESC, session_time DESC",
        )
        .map_err(query_failed)?;
    stmt.query_map([course_id], |r| {
        Ok(stats::SessionRow {
            id: r.get(0)?,
            session_date: r.get(1)?,
            session_time: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_failed)
}

fn stats_course(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let course = owned_course(conn, &course_id, &teacher_id).map_err(|(code, message)| HandlerErr {
        code,
        message,
        details: None,
    })?;

    let sessions = course_sessions(conn, &course_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT a.session_id, a.student_id, st.name, st.email, st.roll_number
             FROM attendance a
             JOIN students st ON a.student_id = st.id
             JOIN sessions ses ON a.session_id = ses.id
             WHERE ses.course_id = ?",
        )
        .map_err(query_failed)?;
    let records = stmt
        .query_map([&course_id], |r| {
            Ok(stats::CourseAttendanceRow {
                session_id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                email: r.get(3)?,
                roll_number: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let computed = stats::course_stats(&sessions, &records);
    Ok(json!({
        "course": course,
        "totalSessions": computed.total_sessions,
        "totalStudentsAttended": computed.total_students_attended,
        "overallAttendanceRate": computed.overall_attendance_rate,
        "sessionsBreakdown": computed.sessions_breakdown,
        "studentsBreakdown": computed.students_breakdown
    }))
}

fn stats_student(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;

    authorize_student_read(conn, params, &student_id, &course_id).map_err(
        |(code, message)| HandlerErr {
            code,
            message,
            details: None,
        },
    )?;

    let student = conn
        .query_row(
            "SELECT id, name, email, roll_number, batch FROM students WHERE id = ?",
            [&student_id],
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
        .map_err(query_failed)?;
    let Some(student) = student else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: None,
        });
    };

    let course = conn
        .query_row(
            "SELECT id, course_name, course_code FROM courses WHERE id = ?",
            [&course_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "courseName": r.get::<_, String>(1)?,
                    "courseCode": r.get::<_, String>(2)?
                }))
            },
        )
        .optional()
        .map_err(query_failed)?;
    let Some(course) = course else {
        return Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        });
    };

    let total_sessions: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sessions WHERE course_id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .map_err(query_failed)?;

    // Present rows only; missed sessions exist as a number, never as rows.
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.session_id, a.status, a.marked_at, ses.session_date, ses.session_time
             FROM attendance a
             JOIN sessions ses ON a.session_id = ses.id
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
                "sessionTime": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    let totals = stats::student_totals(total_sessions, records.len() as i64);

    Ok(json!({
        "student": student,
        "course": course,
        "totalSessions": totals.total_sessions,
        "sessionsAttended": totals.sessions_attended,
        "sessionsMissed": totals.sessions_missed,
        "attendancePercentage": totals.attendance_percentage,
        "records": records
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
        "stats.course" => Some(with_conn(state, req, stats_course)),
        "stats.student" => Some(with_conn(state, req, stats_student)),
        _ => None,
    }
}
