use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Report sections in the order they appear in the batched prompt.
pub const SECTIONS: &[(&str, &str)] = &[
    ("referral", "Reason for Referral"),
    ("family_details", "Family Details"),
    ("birth_history", "Birth/Developmental History"),
    ("school_history", "School History"),
    ("previous_evals", "Previous Evaluations"),
    ("observations", "Behavioral Observations"),
    ("recommendations", "Recommendations"),
];

pub const BASIC_FIELDS: &[&str] = &["name", "dob", "age", "grade", "school", "eval_dates"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpec {
    pub id: String,
    pub label: String,
    pub bullets: Vec<String>,
}

impl SectionSpec {
    pub fn placeholder(&self) -> String {
        token(&format!("{}_paragraph", self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    #[serde(default)]
    pub bullets: Vec<String>,
}

/// Submitted form fields, whatever the trigger (direct download or paid pickup).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportForm {
    #[serde(default)] pub name: String,
    #[serde(default)] pub dob: String,
    #[serde(default)] pub age: String,
    #[serde(default)] pub grade: String,
    #[serde(default)] pub school: String,
    #[serde(default)] pub eval_dates: String,
    #[serde(default)] pub psychologist_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer_information: Option<String>,
    #[serde(default)] pub appendix: String,
    /// Section id -> raw bullets.
    #[serde(default)]
    pub sections: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
    #[serde(default)]
    pub pdf: bool,
}

/// Wrap a field name in the template's token delimiters.
pub fn token(field: &str) -> String {
    format!("{{{{{field}}}}}")
}

fn non_blank(bullets: &[String]) -> Vec<String> {
    bullets
        .iter()
        .filter(|b| !b.trim().is_empty())
        .cloned()
        .collect()
}

impl ReportForm {
    /// Build from flat `key=value` pairs as a web form would post them.
    /// Repeated keys accumulate; `test_<i>_bullets` is 1-based against the
    /// non-blank `test_types` values.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut form = ReportForm::default();
        let mut test_bullets: BTreeMap<usize, Vec<String>> = BTreeMap::new();

        for (k, v) in pairs {
            let key = k.as_ref();
            let value: String = v.into();
            match key {
                "name" => form.name = value,
                "dob" => form.dob = value,
                "age" => form.age = value,
                "grade" => form.grade = value,
                "school" => form.school = value,
                "eval_dates" => form.eval_dates = value,
                "psychologist_name" => form.psychologist_name = value,
                "footer_information" => form.footer_information = Some(value),
                "appendix" => form.appendix = value,
                "pdf" => form.pdf = true,
                "test_types" => form.tests.push(TestSpec { name: value, bullets: vec![] }),
                _ => {
                    if let Some(i) = key
                        .strip_prefix("test_")
                        .and_then(|rest| rest.strip_suffix("_bullets"))
                        .and_then(|n| n.parse::<usize>().ok())
                    {
                        test_bullets.entry(i).or_default().push(value);
                    } else if SECTIONS.iter().any(|(id, _)| *id == key) {
                        form.sections.entry(key.to_string()).or_default().push(value);
                    }
                }
            }
        }

        let named: Vec<usize> = form
            .tests
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.name.trim().is_empty())
            .map(|(idx, _)| idx)
            .collect();
        for (i, bullets) in test_bullets {
            if let Some(&idx) = i.checked_sub(1).and_then(|pos| named.get(pos)) {
                form.tests[idx].bullets = bullets;
            }
        }
        form
    }

    /// Sections with at least one non-blank bullet, in catalogue order.
    pub fn section_specs(&self) -> Vec<SectionSpec> {
        SECTIONS
            .iter()
            .filter_map(|(id, label)| {
                let bullets = non_blank(self.sections.get(*id).map(Vec::as_slice).unwrap_or(&[]));
                if bullets.is_empty() {
                    None
                } else {
                    Some(SectionSpec { id: id.to_string(), label: label.to_string(), bullets })
                }
            })
            .collect()
    }

    /// Tests in submission order; blank names dropped, blank bullets stripped.
    pub fn test_specs(&self) -> Vec<TestSpec> {
        self.tests
            .iter()
            .filter(|t| !t.name.trim().is_empty())
            .map(|t| TestSpec { name: t.name.trim().to_string(), bullets: non_blank(&t.bullets) })
            .collect()
    }

    pub fn basic_field(&self, field: &str) -> &str {
        match field {
            "name" => &self.name,
            "dob" => &self.dob,
            "age" => &self.age,
            "grade" => &self.grade,
            "school" => &self.school,
            "eval_dates" => &self.eval_dates,
            _ => "",
        }
    }

    pub fn footer_information(&self) -> &str {
        self.footer_information
            .as_deref()
            .unwrap_or(&self.psychologist_name)
    }
}
