//! Discovery of Polyglot Benchmark exercises under the sandbox root. Each
//! exercise becomes one goal with a pytest verification command, so benchmark
//! runs exercise the same loop as ad-hoc goals.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::types::Goal;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("benchmark directory {0:?} does not exist")]
    MissingRoot(PathBuf),
    #[error("exercise '{slug}' is missing expected file {path:?}")]
    MissingFile { slug: String, path: PathBuf },
    #[error("no markdown instructions found in {0:?}")]
    MissingInstructions(PathBuf),
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One exercise on disk: a stub solution, its canonical pytest module, and
/// the upstream instructions.
#[derive(Debug, Clone)]
pub struct BenchmarkExercise {
    pub slug: String,
    workspace_root: PathBuf,
    root: PathBuf,
    solution_file: PathBuf,
    test_file: PathBuf,
    instructions: String,
}

impl BenchmarkExercise {
    pub fn display_name(&self) -> String {
        self.slug
            .split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn relative_solution_file(&self) -> String {
        self.relative_path(&self.solution_file)
    }

    pub fn relative_test_file(&self) -> String {
        self.relative_path(&self.test_file)
    }

    fn relative_directory(&self) -> String {
        self.relative_path(&self.root)
    }

    fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace_root)
            .unwrap_or(path)
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// The goal handed to the agent, with pytest on the canonical test file
    /// as the verification command.
    pub fn build_goal(&self) -> Goal {
        let test = self.relative_test_file();
        let text = format!(
            "Primary goal: implement `{solution}` so the canonical test suite `pytest {test}` passes.\n\
             - Run this command from the sandbox root: `pytest {test}`.\n\
             - If you change directory into `{dir}`, run pytest on the test file name instead.\n\
             Rules:\n\
             - Do not create or edit alternate test files; rely on the provided pytest module.\n\
             - Only modify files inside this exercise directory.\n\n\
             Exercise instructions:\n{instructions}",
            solution = self.relative_solution_file(),
            dir = self.relative_directory(),
            instructions = self.instructions.trim(),
        );
        Goal::new(text)
            .with_verify_command(format!("pytest {test}"))
            .with_context_blocks(self.build_context_blocks())
    }

    fn build_context_blocks(&self) -> Vec<String> {
        let mut blocks = Vec::new();
        let instructions = self.instructions.trim();
        if !instructions.is_empty() {
            blocks.push(format!(
                "Exercise instructions ({}/.docs):\n{instructions}",
                self.relative_directory()
            ));
        }
        for path in [&self.solution_file, &self.test_file] {
            if let Ok(contents) = fs::read_to_string(path) {
                let contents = contents.trim_end();
                if !contents.is_empty() {
                    blocks.push(format!(
                        "File `{}`:\n{contents}",
                        self.relative_path(path)
                    ));
                }
            }
        }
        blocks
    }
}

/// Lists exercises below `<sandbox_root>/benchmarks/python/exercises/practice`
/// in name order.
pub struct SuiteLoader {
    workspace_root: PathBuf,
    practice_root: PathBuf,
}

impl SuiteLoader {
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        let workspace_root = sandbox_root.into();
        let practice_root = workspace_root
            .join("benchmarks")
            .join("python")
            .join("exercises")
            .join("practice");
        Self {
            workspace_root,
            practice_root,
        }
    }

    pub fn discover(&self, limit: Option<usize>) -> Result<Vec<BenchmarkExercise>, SuiteError> {
        if !self.practice_root.is_dir() {
            return Err(SuiteError::MissingRoot(self.practice_root.clone()));
        }
        let mut directories: Vec<PathBuf> = fs::read_dir(&self.practice_root)
            .map_err(|source| SuiteError::Io {
                path: self.practice_root.clone(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_dir())
            .collect();
        directories.sort();

        let mut exercises = Vec::new();
        for directory in directories {
            exercises.push(self.build_exercise(&directory)?);
            if limit.is_some_and(|limit| exercises.len() >= limit) {
                break;
            }
        }
        debug!(count = exercises.len(), "benchmark exercises discovered");
        Ok(exercises)
    }

    fn build_exercise(&self, directory: &Path) -> Result<BenchmarkExercise, SuiteError> {
        let slug = directory
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = slug.replace('-', "_");
        let solution_file = directory.join(format!("{stem}.py"));
        let test_file = directory.join(format!("{stem}_test.py"));
        for path in [&solution_file, &test_file] {
            if !path.is_file() {
                return Err(SuiteError::MissingFile {
                    slug,
                    path: path.clone(),
                });
            }
        }
        let instructions = read_instructions(&directory.join(".docs"))?;
        Ok(BenchmarkExercise {
            slug,
            workspace_root: self.workspace_root.clone(),
            root: directory.to_path_buf(),
            solution_file,
            test_file,
            instructions,
        })
    }
}

/// Concatenate the markdown files under `.docs`, name order, blank-line
/// separated.
fn read_instructions(docs_dir: &Path) -> Result<String, SuiteError> {
    if !docs_dir.is_dir() {
        return Err(SuiteError::MissingInstructions(docs_dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = fs::read_dir(docs_dir)
        .map_err(|source| SuiteError::Io {
            path: docs_dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .collect();
    files.sort();

    let mut sections = Vec::new();
    for path in files {
        let text = fs::read_to_string(&path).map_err(|source| SuiteError::Io {
            path: path.clone(),
            source,
        })?;
        let text = text.trim();
        if !text.is_empty() {
            sections.push(text.to_string());
        }
    }
    if sections.is_empty() {
        return Err(SuiteError::MissingInstructions(docs_dir.to_path_buf()));
    }
    Ok(sections.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_exercise(root: &Path, slug: &str) {
        let stem = slug.replace('-', "_");
        let directory = root
            .join("benchmarks/python/exercises/practice")
            .join(slug);
        fs::create_dir_all(directory.join(".docs")).expect("create exercise dirs");
        fs::write(
            directory.join(".docs/instructions.md"),
            format!("Implement {slug}."),
        )
        .expect("write instructions");
        fs::write(directory.join(format!("{stem}.py")), "def solve():\n    pass\n")
            .expect("write solution");
        fs::write(
            directory.join(format!("{stem}_test.py")),
            "def test_solve():\n    assert solve() is None\n",
        )
        .expect("write tests");
    }

    #[test]
    fn discovery_is_name_ordered_and_limit_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_exercise(dir.path(), "two-bucket");
        write_exercise(dir.path(), "beer-song");
        write_exercise(dir.path(), "poker");

        let loader = SuiteLoader::new(dir.path());
        let all = loader.discover(None).expect("discover");
        let slugs: Vec<&str> = all.iter().map(|ex| ex.slug.as_str()).collect();
        assert_eq!(slugs, vec!["beer-song", "poker", "two-bucket"]);

        let limited = loader.discover(Some(2)).expect("discover limited");
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn goals_verify_with_pytest_on_the_canonical_test_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_exercise(dir.path(), "beer-song");

        let loader = SuiteLoader::new(dir.path());
        let exercises = loader.discover(None).expect("discover");
        let goal = exercises[0].build_goal();

        assert_eq!(
            goal.verify_command.as_deref(),
            Some("pytest benchmarks/python/exercises/practice/beer-song/beer_song_test.py")
        );
        assert!(goal.text.contains("beer_song.py"));
        assert!(goal.text.contains("Implement beer-song."));
        // Instructions plus both source files become context blocks.
        assert_eq!(goal.context_blocks.len(), 3);
        assert!(goal.context_blocks[1].contains("def solve()"));
    }

    #[test]
    fn missing_solution_file_is_reported_with_its_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_exercise(dir.path(), "poker");
        let stray = dir
            .path()
            .join("benchmarks/python/exercises/practice/empty-one");
        fs::create_dir_all(&stray).expect("create stray dir");

        let loader = SuiteLoader::new(dir.path());
        let error = loader.discover(None).expect_err("stray dir fails");
        assert!(matches!(error, SuiteError::MissingFile { slug, .. } if slug == "empty-one"));
    }

    #[test]
    fn missing_benchmark_root_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loader = SuiteLoader::new(dir.path());
        assert!(matches!(
            loader.discover(None),
            Err(SuiteError::MissingRoot(_))
        ));
    }

    #[test]
    fn display_names_are_title_cased() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_exercise(dir.path(), "two-bucket");
        let loader = SuiteLoader::new(dir.path());
        let exercises = loader.discover(None).expect("discover");
        assert_eq!(exercises[0].display_name(), "Two Bucket");
    }
}
