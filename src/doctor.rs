use crate::config::RuntimeConfig;
use crate::session::SessionStore;
use crate::spec_loader::CatalogView;

/// Validates catalog files, the session file, and the environment surface
/// without mutating anything, in the style of the teacher's `run_doctor`.
pub fn run_doctor(cfg: &RuntimeConfig) -> anyhow::Result<()> {
    println!("Working directory: {}", cfg.display_working_dir());
    println!(
        "Catalogs: skills={} profiles={}",
        cfg.skills_path.display(),
        cfg.profiles_path.display()
    );

    match CatalogView::load(&cfg.skills_path, &cfg.profiles_path) {
        Ok(catalog) => {
            println!(
                "Catalog check: ok ({} skills, {} profiles)",
                catalog.all_skills().len(),
                catalog.profiles.profiles.len()
            );
        }
        Err(err) => {
            println!("Catalog check: FAILED ({err})");
        }
    }

    let vector_store_exists = cfg.vector_store_path.exists();
    println!(
        "Vector store: {} ({})",
        if vector_store_exists { "present" } else { "absent, embedding path disabled" },
        cfg.vector_store_path.display()
    );

    let store = SessionStore::new(&cfg.working_dir);
    match store.load_current() {
        Ok(Some(session)) => {
            println!(
                "Session: active (session_id={}, profile={}, strictness={})",
                session.session_id, session.profile_id, session.strictness
            );
        }
        Ok(None) => println!("Session: none active"),
        Err(err) => println!("Session check: FAILED ({err})"),
    }

    println!(
        "Environment: strictness_override={:?} immediate_threshold={} suggestion_threshold={} command_timeout_ms={} disable={}",
        cfg.strictness_override,
        cfg.immediate_threshold,
        cfg.suggestion_threshold,
        cfg.command_timeout_ms,
        cfg.disable
    );

    Ok(())
}
