//! Parses and validates the two catalog files (skills, profiles) and exposes
//! a read-only view downstream components consult. No process-wide mutable
//! state: a `CatalogView` is built once in `main` and threaded through.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{ProfileSpec, SkillSpec};

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsCatalog {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub skills: Vec<SkillSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesCatalog {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub profiles: Vec<ProfileSpec>,
}

/// Read-only index over both catalogs, built once at load time.
#[derive(Debug, Clone)]
pub struct CatalogView {
    pub skills: SkillsCatalog,
    pub profiles: ProfilesCatalog,
    skills_by_name: HashMap<String, usize>,
    profiles_by_name: HashMap<String, usize>,
}

impl CatalogView {
    pub fn build(skills: SkillsCatalog, profiles: ProfilesCatalog) -> Result<Self, CoreError> {
        validate_skills(&skills.skills)?;
        validate_profiles(&profiles.profiles)?;

        let skills_by_name = skills
            .skills
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.name.0.clone(), idx))
            .collect();
        let profiles_by_name = profiles
            .profiles
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.name.clone(), idx))
            .collect();

        Ok(Self {
            skills,
            profiles,
            skills_by_name,
            profiles_by_name,
        })
    }

    pub fn load(skills_path: &Path, profiles_path: &Path) -> Result<Self, CoreError> {
        let skills = load_skills_catalog(skills_path)?;
        let profiles = load_profiles_catalog(profiles_path)?;
        Self::build(skills, profiles)
    }

    pub fn skill(&self, name: &str) -> Option<&SkillSpec> {
        self.skills_by_name
            .get(name)
            .map(|&idx| &self.skills.skills[idx])
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileSpec> {
        self.profiles_by_name
            .get(name)
            .map(|&idx| &self.profiles.profiles[idx])
    }

    pub fn all_skills(&self) -> &[SkillSpec] {
        &self.skills.skills
    }
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|err| CoreError::SpecInvalid {
        message: format!("failed to parse '{}': {err}", path.display()),
        skill: None,
    })
}

pub fn load_skills_catalog(path: &Path) -> Result<SkillsCatalog, CoreError> {
    let catalog: SkillsCatalog = read_yaml(path)?;
    validate_skills(&catalog.skills)?;
    Ok(catalog)
}

pub fn load_profiles_catalog(path: &Path) -> Result<ProfilesCatalog, CoreError> {
    let catalog: ProfilesCatalog = read_yaml(path)?;
    validate_profiles(&catalog.profiles)?;
    Ok(catalog)
}

fn validate_skills(skills: &[SkillSpec]) -> Result<(), CoreError> {
    let mut seen = std::collections::HashSet::new();
    for skill in skills {
        if !seen.insert(skill.name.0.clone()) {
            return Err(CoreError::SpecInvalid {
                message: format!("duplicate skill name '{}'", skill.name),
                skill: Some(skill.name.clone()),
            });
        }

        if skill.conflicts.contains(&skill.name) {
            return Err(CoreError::SpecInvalid {
                message: format!("skill '{}' lists itself in conflicts", skill.name),
                skill: Some(skill.name.clone()),
            });
        }

        let overlap: Vec<_> = skill.provides.intersection(&skill.requires).collect();
        if !overlap.is_empty() {
            return Err(CoreError::SpecInvalid {
                message: format!(
                    "skill '{}' has overlapping provides/requires: {:?}",
                    skill.name, overlap
                ),
                skill: Some(skill.name.clone()),
            });
        }
    }
    Ok(())
}

fn validate_profiles(profiles: &[ProfileSpec]) -> Result<(), CoreError> {
    let mut seen = std::collections::HashSet::new();
    for profile in profiles {
        if profile.name.trim().is_empty() {
            return Err(CoreError::spec_invalid("profile name must be non-empty"));
        }
        if !seen.insert(profile.name.clone()) {
            return Err(CoreError::spec_invalid(format!(
                "duplicate profile name '{}'",
                profile.name
            )));
        }
    }
    Ok(())
}
