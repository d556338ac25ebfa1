//! Effective environment for a run.

use std::collections::{BTreeMap, HashMap};

/// Merge project variables with run-level overrides. Overrides win.
pub fn merge_environment(
    project: HashMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = project.into_iter().collect();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_project_defaults() {
        let project = HashMap::from([
            ("BASE_URL".to_string(), "https://staging".to_string()),
            ("LOCALE".to_string(), "en".to_string()),
        ]);
        let overrides = BTreeMap::from([("BASE_URL".to_string(), "https://preview".to_string())]);

        let env = merge_environment(project, &overrides);
        assert_eq!(env["BASE_URL"], "https://preview");
        assert_eq!(env["LOCALE"], "en");
    }

    #[test]
    fn overrides_may_add_new_keys() {
        let overrides = BTreeMap::from([("FEATURE_FLAG".to_string(), "on".to_string())]);
        let env = merge_environment(HashMap::new(), &overrides);
        assert_eq!(env.len(), 1);
    }
}
