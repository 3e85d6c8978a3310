use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
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

fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
struct CourseRow {
    id: String,
    course_name: String,
    course_code: String,
    teacher_id: String,
    semester: Option<String>,
    batch: Option<String>,
    academic_session: Option<String>,
    created_at: String,
}

impl CourseRow {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "courseName": self.course_name,
            "courseCode": self.course_code,
            "teacherId": self.teacher_id,
            "semester": self.semester,
            "batch": self.batch,
            "academicSession": self.academic_session,
            "createdAt": self.created_at
        })
    }
}

fn find_course(conn: &Connection, course_id: &str) -> Result<Option<CourseRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, course_name, course_code, teacher_id, semester, batch, academic_session, created_at
         FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(CourseRow {
                id: r.get(0)?,
                course_name: r.get(1)?,
                course_code: r.get(2)?,
                teacher_id: r.get(3)?,
                semester: r.get(4)?,
                batch: r.get(5)?,
                academic_session: r.get(6)?,
                created_at: r.get(7)?,
            })
        },
    )
    .optional()
    .map_err(query_failed)
}

fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(query_failed)
}

/// Course lookup plus the ownership gate shared by update/delete and the
/// session/attendance/stats handlers.
pub fn owned_course(
    conn: &Connection,
    course_id: &str,
    teacher_id: &str,
) -> Result<serde_json::Value, (&'static str, String)> {
    let row = conn
        .query_row(
            "SELECT id, course_name, course_code, teacher_id, semester, batch, academic_session, created_at
             FROM courses WHERE id = ?",
            [course_id],
            |r| {
                Ok(CourseRow {
                    id: r.get(0)?,
                    course_name: r.get(1)?,
                    course_code: r.get(2)?,
                    teacher_id: r.get(3)?,
                    semester: r.get(4)?,
                    batch: r.get(5)?,
                    academic_session: r.get(6)?,
                    created_at: r.get(7)?,
                })
            },
        )
        .optional()
        .map_err(|e| ("db_query_failed", e.to_string()))?;

    let Some(course) = row else {
        return Err(("not_found", "course not found".to_string()));
    };
    if course.teacher_id != teacher_id {
        return Err((
            "not_authorized",
            "not authorized for this course".to_string(),
        ));
    }
    Ok(course.to_json())
}

fn courses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let course_name = get_required_str(params, "courseName")?;
    let course_code = get_required_str(params, "courseCode")?;
    let semester = get_optional_str(params, "semester");
    let batch = get_optional_str(params, "batch");
    let academic_session = get_optional_str(params, "academicSession");

    if !teacher_exists(conn, &teacher_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: None,
        });
    }

    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM courses WHERE course_code = ?",
            [&course_code],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if taken.is_some() {
        return Err(HandlerErr {
            code: "duplicate_course_code",
            message: "course code already exists".to_string(),
            details: None,
        });
    }

    let course_id = Uuid::new_v4().to_string();
    let created_at = db::now_stamp();
    conn.execute(
        "INSERT INTO courses(id, course_name, course_code, teacher_id, semester, batch, academic_session, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &course_id,
            &course_name,
            &course_code,
            &teacher_id,
            &semester,
            &batch,
            &academic_session,
            &created_at,
        ),
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            HandlerErr {
                code: "duplicate_course_code",
                message: "course code already exists".to_string(),
                details: None,
            }
        } else {
            HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "courses" })),
            }
        }
    })?;

    Ok(json!({
        "course": {
            "id": course_id,
            "courseName": course_name,
            "courseCode": course_code,
            "teacherId": teacher_id,
            "semester": semester,
            "batch": batch,
            "academicSession": academic_session,
            "createdAt": created_at
        }
    }))
}

fn courses_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.course_name, c.course_code, c.teacher_id, c.semester, c.batch,
                    c.academic_session, c.created_at, t.name, t.department
             FROM courses c
             JOIN teachers t ON c.teacher_id = t.id
             ORDER BY c.created_at DESC, c.rowid DESC",
        )
        .map_err(query_failed)?;
    let courses = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "courseName": r.get::<_, String>(1)?,
                "courseCode": r.get::<_, String>(2)?,
                "teacherId": r.get::<_, String>(3)?,
                "semester": r.get::<_, Option<String>>(4)?,
                "batch": r.get::<_, Option<String>>(5)?,
                "academicSession": r.get::<_, Option<String>>(6)?,
                "createdAt": r.get::<_, String>(7)?,
                "teacherName": r.get::<_, String>(8)?,
                "department": r.get::<_, Option<String>>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "courses": courses }))
}

fn courses_list_for_teacher(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, course_name, course_code, teacher_id, semester, batch, academic_session, created_at
             FROM courses
             WHERE teacher_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(query_failed)?;
    let courses = stmt
        .query_map([&teacher_id], |r| {
            Ok(CourseRow {
                id: r.get(0)?,
                course_name: r.get(1)?,
                course_code: r.get(2)?,
                teacher_id: r.get(3)?,
                semester: r.get(4)?,
                batch: r.get(5)?,
                academic_session: r.get(6)?,
                created_at: r.get(7)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "courses": courses.iter().map(CourseRow::to_json).collect::<Vec<_>>() }))
}

fn courses_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let row = conn
        .query_row(
            "SELECT c.id, c.course_name, c.course_code, c.teacher_id, c.semester, c.batch,
                    c.academic_session, c.created_at, t.name, t.department
             FROM courses c
             JOIN teachers t ON c.teacher_id = t.id
             WHERE c.id = ?",
            [&course_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "courseName": r.get::<_, String>(1)?,
                    "courseCode": r.get::<_, String>(2)?,
                    "teacherId": r.get::<_, String>(3)?,
                    "semester": r.get::<_, Option<String>>(4)?,
                    "batch": r.get::<_, Option<String>>(5)?,
                    "academicSession": r.get::<_, Option<String>>(6)?,
                    "createdAt": r.get::<_, String>(7)?,
                    "teacherName": r.get::<_, String>(8)?,
                    "department": r.get::<_, Option<String>>(9)?
                }))
            },
        )
        .optional()
        .map_err(query_failed)?;
    match row {
        Some(course) => Ok(json!({ "course": course })),
        None => Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        }),
    }
}

fn courses_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let Some(mut course) = find_course(conn, &course_id)? else {
        return Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        });
    };
    if course.teacher_id != teacher_id {
        return Err(HandlerErr {
            code: "not_authorized",
            message: "not authorized to update this course".to_string(),
            details: None,
        });
    }

    let patch = params.get("patch").cloned().unwrap_or(json!({}));
    if !patch.is_object() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "patch must be an object".to_string(),
            details: None,
        });
    }
    if patch.get("courseName").is_some() {
        course.course_name = get_required_str(&patch, "courseName")?;
    }
    if patch.get("courseCode").is_some() {
        course.course_code = get_required_str(&patch, "courseCode")?;
    }
    // Optional labels: explicit null clears, a string replaces, absent keeps.
    if let Some(v) = patch.get("semester") {
        course.semester = if v.is_null() { None } else { get_optional_str(&patch, "semester") };
    }
    if let Some(v) = patch.get("batch") {
        course.batch = if v.is_null() { None } else { get_optional_str(&patch, "batch") };
    }
    if let Some(v) = patch.get("academicSession") {
        course.academic_session = if v.is_null() {
            None
        } else {
            get_optional_str(&patch, "academicSession")
        };
    }

    conn.execute(
        "UPDATE courses
         SET course_name = ?, course_code = ?, semester = ?, batch = ?, academic_session = ?
         WHERE id = ?",
        (
            &course.course_name,
            &course.course_code,
            &course.semester,
            &course.batch,
            &course.academic_session,
            &course.id,
        ),
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            HandlerErr {
                code: "duplicate_course_code",
                message: "course code already exists".to_string(),
                details: None,
            }
        } else {
            HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "courses" })),
            }
        }
    })?;

    Ok(json!({ "course": course.to_json() }))
}

fn courses_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let Some(course) = find_course(conn, &course_id)? else {
        return Err(HandlerErr {
            code: "not_found",
            message: "course not found".to_string(),
            details: None,
        });
    };
    if course.teacher_id != teacher_id {
        return Err(HandlerErr {
            code: "not_authorized",
            message: "not authorized to delete this course".to_string(),
            details: None,
        });
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM attendance
         WHERE session_id IN (SELECT id FROM sessions WHERE course_id = ?)",
        [&course_id],
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance" })),
        });
    }
    if let Err(e) = tx.execute("DELETE FROM sessions WHERE course_id = ?", [&course_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "sessions" })),
        });
    }
    if let Err(e) = tx.execute("DELETE FROM courses WHERE id = ?", [&course_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "courses" })),
        });
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true }))
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
        "courses.create" => Some(with_conn(state, req, courses_create)),
        "courses.list" => Some(with_conn(state, req, |c, _| courses_list(c))),
        "courses.listForTeacher" => Some(with_conn(state, req, courses_list_for_teacher)),
        "courses.get" => Some(with_conn(state, req, courses_get)),
        "courses.update" => Some(with_conn(state, req, courses_update)),
        "courses.delete" => Some(with_conn(state, req, courses_delete)),
        _ => None,
    }
}
