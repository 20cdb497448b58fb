mod test_support;

// Construir el pool ya corre las migraciones; el smoke test sólo verifica que
// el checkout posterior funcione.
#[test]
fn migrations_apply_and_pool_checks_out() {
    let ran = test_support::with_pool(|pool| {
        let conn = pool.get();
        assert!(conn.is_ok(), "checkout post-migraciones: {:?}", conn.err());
    });
    if ran.is_none() {
        eprintln!("skip migrations_apply_and_pool_checks_out (no DATABASE_URL)");
    }
}
