//! Built-in pipeline presets.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::manifest::{CheckSpec, PipelineManifest, Probe};
use crate::runner::CommandSpec;

const INSTALL_TIMEOUT_SECS: u64 = 600;
const TEST_TIMEOUT_SECS: u64 = 300;

/// The generators shipped with App Factory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltinPipeline {
    /// Expo / React Native mobile app
    MobileApp,

    /// Hardhat smart contracts plus web frontend
    Dapp,

    /// Vite-based embeddable mini-app
    MiniApp,

    /// Browser extension plugin
    Plugin,

    /// Conversational bot service
    Chatbot,
}

impl BuiltinPipeline {
    pub const ALL: [BuiltinPipeline; 5] = [
        BuiltinPipeline::MobileApp,
        BuiltinPipeline::Dapp,
        BuiltinPipeline::MiniApp,
        BuiltinPipeline::Plugin,
        BuiltinPipeline::Chatbot,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinPipeline::MobileApp => "mobile-app",
            BuiltinPipeline::Dapp => "dapp",
            BuiltinPipeline::MiniApp => "mini-app",
            BuiltinPipeline::Plugin => "plugin",
            BuiltinPipeline::Chatbot => "chatbot",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BuiltinPipeline::MobileApp => "Expo / React Native mobile app",
            BuiltinPipeline::Dapp => "Hardhat contracts with a web frontend",
            BuiltinPipeline::MiniApp => "Vite-based embeddable mini-app",
            BuiltinPipeline::Plugin => "Browser extension plugin",
            BuiltinPipeline::Chatbot => "Conversational bot service",
        }
    }

    /// Default manifest: `npm install`, structure checks and `npm test`,
    /// weighted to 100 points.
    pub fn manifest(&self) -> PipelineManifest {
        let mut manifest = PipelineManifest::new(self.name());
        manifest.install = Some(
            CommandSpec::new("npm_install", ["npm", "install"]).with_timeout(INSTALL_TIMEOUT_SECS),
        );
        manifest.checks = self.checks();
        manifest
    }

    fn checks(&self) -> Vec<CheckSpec> {
        let mut checks = vec![file("package-json", "package.json present", "package.json", 10)
            .describe("Generate a package.json at the project root")
            .mandatory()];

        match self {
            BuiltinPipeline::MobileApp => {
                checks.push(file("app-config", "app.json present", "app.json", 10));
                checks.push(file("tsconfig", "tsconfig.json present", "tsconfig.json", 10));
                checks.push(
                    content("expo-dep", "Expo dependency declared", "package.json", r#""expo"\s*:"#, 15)
                        .describe("Add expo to dependencies"),
                );
                checks.push(test_script(10));
                checks.push(readme());
                checks.push(file("gitignore", ".gitignore present", ".gitignore", 5));
                checks.push(npm_test(35));
            }
            BuiltinPipeline::Dapp => {
                checks.push(file("hardhat-config", "Hardhat config present", "hardhat.config.ts", 15));
                checks.push(
                    file("contracts-dir", "contracts directory present", "contracts", 15)
                        .describe("Place Solidity sources under contracts/"),
                );
                checks.push(content(
                    "web3-client",
                    "Web3 client dependency declared",
                    "package.json",
                    r#""(ethers|viem)"\s*:"#,
                    10,
                ));
                checks.push(file("tsconfig", "tsconfig.json present", "tsconfig.json", 10));
                checks.push(file("env-example", ".env.example present", ".env.example", 5));
                checks.push(readme());
                checks.push(npm_test(30));
            }
            BuiltinPipeline::MiniApp => {
                checks.push(file("index-html", "index.html present", "index.html", 10));
                checks.push(file("vite-config", "Vite config present", "vite.config.ts", 10));
                checks.push(content("vite-dep", "Vite dependency declared", "package.json", r#""vite"\s*:"#, 10));
                checks.push(file("tsconfig", "tsconfig.json present", "tsconfig.json", 10));
                checks.push(
                    file("web-manifest", "Web app manifest present", "public/manifest.json", 15)
                        .describe("Add public/manifest.json describing the mini-app"),
                );
                checks.push(readme());
                checks.push(npm_test(30));
            }
            BuiltinPipeline::Plugin => {
                checks.push(file("extension-manifest", "manifest.json present", "manifest.json", 15).mandatory());
                checks.push(content(
                    "manifest-version",
                    "manifest_version declared",
                    "manifest.json",
                    r#""manifest_version"\s*:\s*3"#,
                    15,
                ));
                checks.push(file("tsconfig", "tsconfig.json present", "tsconfig.json", 10));
                checks.push(file("entrypoint", "src/index.ts present", "src/index.ts", 10));
                checks.push(readme());
                checks.push(npm_test(35));
            }
            BuiltinPipeline::Chatbot => {
                checks.push(file("entrypoint", "src/index.ts present", "src/index.ts", 10));
                checks.push(
                    content("api-key-example", "API key documented", ".env.example", "API_KEY", 10)
                        .describe("List required API keys in .env.example"),
                );
                checks.push(file("tsconfig", "tsconfig.json present", "tsconfig.json", 10));
                checks.push(file("prompts-dir", "prompts directory present", "src/prompts", 10));
                checks.push(file("dockerfile", "Dockerfile present", "Dockerfile", 10));
                checks.push(readme());
                checks.push(npm_test(35));
            }
        }
        checks
    }
}

impl std::fmt::Display for BuiltinPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinPipeline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltinPipeline::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = BuiltinPipeline::ALL.iter().map(|p| p.name()).collect();
                format!("unknown pipeline '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

fn file(id: &str, name: &str, path: &str, points: u32) -> CheckSpec {
    CheckSpec::new(
        id,
        name,
        "structure",
        points,
        Probe::FileExists { path: path.into() },
    )
    .describe(format!("Create {}", path))
}

fn readme() -> CheckSpec {
    CheckSpec::new(
        "readme",
        "README present",
        "docs",
        5,
        Probe::FileExists {
            path: "README.md".into(),
        },
    )
    .describe("Document setup and usage in README.md")
}

fn content(id: &str, name: &str, path: &str, pattern: &str, points: u32) -> CheckSpec {
    CheckSpec::new(
        id,
        name,
        "dependencies",
        points,
        Probe::ContentMatch {
            path: path.into(),
            pattern: pattern.to_string(),
        },
    )
}

fn test_script(points: u32) -> CheckSpec {
    CheckSpec::new(
        "test-script",
        "npm test script defined",
        "quality",
        points,
        Probe::ContentMatch {
            path: "package.json".into(),
            pattern: r#""test"\s*:"#.to_string(),
        },
    )
    .describe("Add a \"test\" script to package.json")
}

fn npm_test(points: u32) -> CheckSpec {
    CheckSpec::new(
        "npm-test",
        "npm test passes",
        "quality",
        points,
        Probe::Command {
            command: vec!["npm".to_string(), "test".to_string()],
            timeout_secs: TEST_TIMEOUT_SECS,
        },
    )
    .describe("Fix the failing tests reported by npm test")
    .mandatory()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_preset_totals_100_points() {
        for preset in BuiltinPipeline::ALL {
            assert_eq!(preset.manifest().total_points(), 100, "{}", preset);
        }
    }

    #[test]
    fn test_every_preset_builds_an_engine() {
        for preset in BuiltinPipeline::ALL {
            let manifest = preset.manifest();
            let engine = manifest.build_engine().unwrap();
            assert_eq!(engine.registry().total_points(), 100);
            assert_eq!(manifest.pipeline, preset.name());
        }
    }

    #[test]
    fn test_every_preset_installs_and_runs_npm_test() {
        for preset in BuiltinPipeline::ALL {
            let manifest = preset.manifest();
            assert_eq!(
                manifest.install.as_ref().unwrap().command,
                vec!["npm", "install"]
            );
            assert!(manifest.checks.iter().any(|c| matches!(
                &c.probe,
                Probe::Command { command, .. } if command == &["npm", "test"]
            )));
        }
    }

    #[test]
    fn test_name_round_trip() {
        for preset in BuiltinPipeline::ALL {
            assert_eq!(preset.name().parse::<BuiltinPipeline>().unwrap(), preset);
        }
        assert!("desktop-app".parse::<BuiltinPipeline>().is_err());
    }
}
