use super::*;
use crate::backend::AuthUser;

fn row(role: &str, status: Option<&str>) -> UserProfile {
    let status = status.map_or("null".to_owned(), |s| format!("\"{s}\""));
    let json = format!(
        r#"{{"id":"00000000-0000-0000-0000-000000000001","uid":"00000000-0000-0000-0000-000000000002",
            "email":"Mia@Example.com","name":"Mia Wong","role":"{role}","status":{status}}}"#
    );
    serde_json::from_str(&json).unwrap()
}

fn signed_in(profile: Option<UserProfile>) -> SessionSnapshot {
    SessionSnapshot {
        user: Some(AuthUser { id: Uuid::nil(), email: Some("mia@example.com".into()) }),
        profile,
        loading: false,
        error: None,
    }
}

// =============================================================================
// Role / status
// =============================================================================

#[test]
fn unknown_role_deserializes_to_unknown() {
    assert_eq!(row("owner", None).role, Role::Unknown);
    assert_eq!(row("admin", None).role, Role::Admin);
}

#[test]
fn only_exact_deleted_label_is_deleted() {
    assert!(row("member", Some("Deleted")).status.is_deleted());
    assert!(!row("member", Some("deleted")).status.is_deleted());
    assert!(!row("member", None).status.is_deleted());
    assert_eq!(row("member", Some("On Hold")).status, ProfileStatus::Active(Some("On Hold".into())));
}

#[test]
fn missing_status_field_defaults_to_active() {
    let json = r#"{"id":"00000000-0000-0000-0000-000000000001","uid":"00000000-0000-0000-0000-000000000002",
                   "email":"a@b.c","name":"A","role":"member"}"#;
    let p: UserProfile = serde_json::from_str(json).unwrap();
    assert_eq!(p.status, ProfileStatus::Active(None));
    assert!(p.join_date.is_none());
}

#[test]
fn status_serializes_back_to_its_label() {
    let json = serde_json::to_value(row("member", Some("In Progress"))).unwrap();
    assert_eq!(json["status"], "In Progress");
    let json = serde_json::to_value(row("member", Some(DELETED_STATUS))).unwrap();
    assert_eq!(json["status"], "Deleted");
}

#[test]
fn search_matches_name_or_email_case_insensitively() {
    let p = row("member", None);
    assert!(p.matches_search("wong"));
    assert!(p.matches_search("MIA@example"));
    assert!(p.matches_search("  "));
    assert!(!p.matches_search("zed"));
}

// =============================================================================
// Landing
// =============================================================================

#[test]
fn loading_wins_over_everything() {
    let mut s = signed_in(Some(row("admin", None)));
    s.loading = true;
    s.error = Some("x".into());
    assert_eq!(Landing::from_snapshot(&s), Landing::Loading);
}

#[test]
fn error_or_no_user_goes_to_login() {
    let mut s = signed_in(Some(row("admin", None)));
    s.error = Some("Your account has been deleted.".into());
    assert_eq!(Landing::from_snapshot(&s), Landing::Login);
    assert_eq!(Landing::from_snapshot(&SessionSnapshot::default()), Landing::Login);
}

#[test]
fn user_without_profile_is_pending() {
    assert_eq!(Landing::from_snapshot(&signed_in(None)), Landing::Pending);
    assert_eq!(Landing::Pending.path(), None);
}

#[test]
fn role_picks_landing() {
    assert_eq!(Landing::from_snapshot(&signed_in(Some(row("admin", None)))), Landing::Admin);
    assert_eq!(Landing::from_snapshot(&signed_in(Some(row("member", None)))), Landing::Member);
    assert_eq!(Landing::from_snapshot(&signed_in(Some(row("guest", None)))), Landing::Login);
    assert_eq!(Landing::Member.path(), Some("/member"));
}
