//! Access-control policy: the single place that knows which records an actor
//! may see and which mutations are allowed. Handlers consult this module
//! instead of branching on roles themselves.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Parent => "parent",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "parent" => Some(Role::Parent),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The authenticated identity attached to a request.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Student,
    Grade,
    Attendance,
    Behavior,
    Assignment,
    Meeting,
    Message,
    Announcement,
    User,
}

/// A SQL fragment restricting a query to the actor's visible records, plus
/// its positional parameters. Callers AND this with their own filters; a
/// request filter can narrow the scope but never widen it.
pub struct Scope {
    pub clause: String,
    pub params: Vec<String>,
}

impl Scope {
    fn all() -> Scope {
        Scope {
            clause: "1=1".to_string(),
            params: Vec::new(),
        }
    }

    fn of(clause: &str, params: Vec<String>) -> Scope {
        Scope {
            clause: clause.to_string(),
            params,
        }
    }
}

const CHILDREN_OF: &str = "(SELECT student_id FROM student_parents WHERE parent_id = ?)";

/// Visibility predicate for list and single-record reads. `now` is the
/// RFC 3339 timestamp used for announcement expiry, which is a read-time
/// condition rather than a stored state transition.
pub fn visibility(resource: Resource, actor: &Actor, now: &str) -> Scope {
    let me = || vec![actor.id.clone()];
    match resource {
        Resource::Student => match actor.role {
            Role::Parent => Scope::of(&format!("id IN {CHILDREN_OF}"), me()),
            // Assignment-based filtering (student_teachers) is intentionally
            // not applied: teachers need the full roster for attendance and
            // grading.
            Role::Teacher | Role::Admin => Scope::all(),
        },
        Resource::Grade | Resource::Attendance | Resource::Behavior => match actor.role {
            Role::Parent => Scope::of(&format!("student_id IN {CHILDREN_OF}"), me()),
            Role::Teacher => Scope::of("teacher_id = ?", me()),
            Role::Admin => Scope::all(),
        },
        Resource::Assignment => match actor.role {
            Role::Parent => Scope::of(
                "(status != 'draft' AND EXISTS (
                    SELECT 1 FROM assignment_students ax
                    JOIN student_parents sp ON sp.student_id = ax.student_id
                    WHERE ax.assignment_id = assignments.id AND sp.parent_id = ?))",
                me(),
            ),
            Role::Teacher => Scope::of("teacher_id = ?", me()),
            Role::Admin => Scope::all(),
        },
        Resource::Meeting => match actor.role {
            Role::Parent => Scope::of("parent_id = ?", me()),
            Role::Teacher => Scope::of("teacher_id = ?", me()),
            Role::Admin => Scope::all(),
        },
        Resource::Message => Scope::of(
            "(sender_id = ? OR receiver_id = ?)",
            vec![actor.id.clone(), actor.id.clone()],
        ),
        Resource::Announcement => {
            let fresh = "is_active = 1 AND (expires_at IS NULL OR expires_at = '' OR expires_at >= ?)";
            match actor.role {
                Role::Parent => Scope::of(
                    &format!(
                        "((target_audience IN ('all', 'parents') OR EXISTS (
                            SELECT 1 FROM announcement_students an
                            JOIN student_parents sp ON sp.student_id = an.student_id
                            WHERE an.announcement_id = announcements.id AND sp.parent_id = ?))
                          AND {fresh})"
                    ),
                    vec![actor.id.clone(), now.to_string()],
                ),
                Role::Teacher => Scope::of(
                    &format!("(target_audience IN ('all', 'teachers') AND {fresh})"),
                    vec![now.to_string()],
                ),
                Role::Admin => Scope::all(),
            }
        }
        Resource::User => match actor.role {
            Role::Parent => Scope::of("role = 'teacher'", Vec::new()),
            Role::Teacher => Scope::of("role = 'parent'", Vec::new()),
            Role::Admin => Scope::all(),
        },
    }
}

/// Role gate for record creation. Ownership of an existing record is a
/// separate check (`owns`); meetings and messages carry additional
/// participant-eligibility rules in their handlers.
pub fn can_create(resource: Resource, role: Role) -> bool {
    match resource {
        // Teachers and admins enroll students; parents may self-serve and are
        // linked to the new student as a side effect.
        Resource::Student => true,
        Resource::Grade
        | Resource::Attendance
        | Resource::Behavior
        | Resource::Assignment
        | Resource::Announcement => matches!(role, Role::Teacher | Role::Admin),
        Resource::Meeting | Resource::Message => matches!(role, Role::Parent | Role::Teacher),
        Resource::User => role == Role::Admin,
    }
}

/// Ownership check for update/delete: the record's author, or an admin.
pub fn owns(actor: &Actor, owner_id: &str) -> bool {
    actor.role == Role::Admin || actor.id == owner_id
}
