//! Every backend's native unique-violation shape lands on `DuplicateKey`.

use sqlguard_core::{
    BackendError, DefaultErrorMapper, Dialect, Error, ErrorKind, ErrorMapper, RawError,
};

fn classify(err: BackendError) -> Error {
    DefaultErrorMapper::new().map(Error::Raw(RawError::Backend(err)))
}

#[test]
fn test_unique_violation_round_trip() {
    let cases = [
        BackendError::new("duplicate key value violates unique constraint \"users_email_key\"")
            .with_dialect(Dialect::Postgres)
            .with_sqlstate("23505"),
        BackendError::new(
            "pq: duplicate key value violates unique constraint \"users_email_key\" (SQLSTATE 23505)",
        ),
        BackendError::new("Duplicate entry 'a@x' for key 'users.email'")
            .with_dialect(Dialect::Mysql)
            .with_vendor_code(1062),
        BackendError::new("Error 1062 (23000): Duplicate entry 'a@x' for key 'users.email'"),
        BackendError::new("UNIQUE constraint failed: users.email")
            .with_dialect(Dialect::Sqlite)
            .with_vendor_code(2067),
        BackendError::new("UNIQUE constraint failed: users.email"),
    ];

    for case in cases {
        let text = case.message.clone();
        let err = classify(case);
        assert_eq!(err.kind(), ErrorKind::DuplicateKey, "{text}");
        assert!(matches!(err.raw(), Some(RawError::Backend(b)) if b.message == text));
    }
}

#[test]
fn test_classified_errors_survive_every_mapper_unchanged() {
    let mapper = DefaultErrorMapper::new();
    let once = classify(
        BackendError::new("deadlock detected")
            .with_dialect(Dialect::Postgres)
            .with_sqlstate("40P01"),
    );
    let twice = mapper.map(mapper.map(once));
    assert_eq!(twice.kind(), ErrorKind::Deadlock);
    assert!(matches!(twice.raw(), Some(RawError::Backend(_))));
}

#[test]
fn test_unrecognized_backend_error_stays_raw() {
    let err = classify(BackendError::new("syntax error at or near \"SELEC\""));
    assert!(err.is_raw());
    assert_eq!(err.kind(), ErrorKind::Unclassified);
}
