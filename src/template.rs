//! Session Template: renders the launch script embedded in a workload's
//! container command. Everything the running container needs to become a
//! reachable VS Code Server is self-contained in this one script, so the
//! container image itself can be anything from `ubuntu:22.04` to a fully
//! custom devcontainer build.

use std::fmt::Write as _;

/// Inputs the launch script is parameterized on. Connection-sensitive values
/// (`token`) arrive through the Session Configuration Record as environment
/// variables, not interpolated directly into the script, so they never show
/// up in a `kubectl get pod -o yaml` of the workload spec.
#[derive(Debug, Clone)]
pub struct LaunchScriptParams<'a> {
    pub instance_path: &'a str,
    pub vscode_version: &'a str,
    pub extensions: &'a [String],
    pub settings: &'a serde_json::Value,
    pub post_create_command: Option<&'a str>,
}

/// Renders the bash script that becomes the container's entrypoint. The
/// script installs the `code` CLI for whatever architecture it finds itself
/// running on, optionally installs marketplace extensions and settings,
/// seeds a README into an empty workspace, and finally execs
/// `code serve-web` as the unprivileged `vscode` user.
pub fn render_launch_script(params: &LaunchScriptParams<'_>) -> String {
    let mut script = String::new();

    let _ = writeln!(script, "#!/bin/bash");
    let _ = writeln!(script, "set -e");
    let _ = writeln!(script);
    let _ = writeln!(script, "echo \"=== VS Code Server Setup ===\"");
    let _ = writeln!(
        script,
        "if ! id vscode >/dev/null 2>&1; then useradd -m -s /bin/bash -u 1000 vscode 2>/dev/null || true; fi"
    );
    let _ = writeln!(
        script,
        "if command -v apt-get >/dev/null 2>&1; then apt-get update >/dev/null 2>&1 || true; apt-get install -y curl wget ca-certificates git sudo jq unzip file tar gzip >/dev/null 2>&1 || true; fi"
    );
    let _ = writeln!(script);
    let _ = writeln!(script, "INSTALL_LOCATION=\"/home/vscode/.local/bin\"");
    let _ = writeln!(script, "DATA_DIR=\"/home/vscode/.vscode-server\"");
    let _ = writeln!(script, "VSCODE_VERSION=\"{}\"", params.vscode_version);
    let _ = writeln!(
        script,
        "mkdir -p \"$INSTALL_LOCATION\" \"$DATA_DIR/data/Machine\" \"$DATA_DIR/extensions\""
    );
    let _ = writeln!(script);
    let _ = writeln!(script, "if [ ! -e \"$INSTALL_LOCATION/code\" ]; then");
    let _ = writeln!(script, "  if [ \"$(uname -m)\" = \"x86_64\" ]; then TARGET=\"cli-linux-x64\"");
    let _ = writeln!(
        script,
        "  elif [ \"$(uname -m)\" = \"aarch64\" ] || [ \"$(uname -m)\" = \"arm64\" ]; then TARGET=\"cli-linux-arm64\""
    );
    let _ = writeln!(script, "  else echo \"ERROR: unsupported architecture: $(uname -m)\"; exit 1; fi");
    let _ = writeln!(
        script,
        "  DOWNLOAD_URL=\"https://update.code.visualstudio.com/${{VSCODE_VERSION}}/${{TARGET}}/stable\""
    );
    let _ = writeln!(
        script,
        "  curl -fsSL \"$DOWNLOAD_URL\" | tar xz -C \"$INSTALL_LOCATION\""
    );
    let _ = writeln!(script, "  chmod +x \"$INSTALL_LOCATION/code\"");
    let _ = writeln!(script, "fi");
    let _ = writeln!(script);
    let _ = writeln!(script, "chown -R vscode:vscode /home/vscode /workspace /shared");
    let _ = writeln!(script, "export PATH=\"$INSTALL_LOCATION:$PATH\"");
    let _ = writeln!(script, "\"$INSTALL_LOCATION/code\" --version");
    let _ = writeln!(script);
    let _ = writeln!(script, "{}", EXTENSION_INSTALLER_FN);

    if !params.extensions.is_empty() {
        let _ = writeln!(script, "echo \"Installing extensions...\"");
        for extension in params.extensions {
            let _ = writeln!(script, "install_extension_from_marketplace '{extension}'");
        }
    }

    if params.settings.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
        let settings_json = params.settings.to_string().replace('\'', "'\\''");
        let _ = writeln!(script, "mkdir -p \"$DATA_DIR/data/Machine\"");
        let _ = writeln!(script, "echo '{settings_json}' > \"$DATA_DIR/data/Machine/settings.json\"");
        let _ = writeln!(script, "chown -R vscode:vscode \"$DATA_DIR/data\"");
    }

    if let Some(command) = params.post_create_command {
        let escaped = command.replace('\'', "'\\''");
        let _ = writeln!(
            script,
            "su - vscode -c 'cd /workspace && {escaped}' || echo \"post-create command failed\""
        );
    }

    let _ = writeln!(script);
    let _ = writeln!(script, "if [ -z \"$(ls -A /workspace 2>/dev/null)\" ]; then");
    let _ = writeln!(script, "  su - vscode -c \"cat > /workspace/README.md << 'EOF'");
    let _ = writeln!(script, "# Welcome to your VS Code Server instance");
    let _ = writeln!(script);
    let _ = writeln!(script, "Instance path: {}", params.instance_path);
    let _ = writeln!(script, "VS Code version: {}", params.vscode_version);
    let _ = writeln!(script);
    let _ = writeln!(script, "- /workspace: your project files, instance-specific");
    let _ = writeln!(script, "- /shared: shared storage across all your instances");
    let _ = writeln!(script, "EOF");
    let _ = writeln!(script, "\" || echo \"failed to seed README\"");
    let _ = writeln!(script, "fi");
    let _ = writeln!(script);
    let _ = writeln!(script, "exec su - vscode -c \"");
    let _ = writeln!(script, "  export PATH='$INSTALL_LOCATION:$PATH'");
    let _ = writeln!(script, "  exec '$INSTALL_LOCATION/code' serve-web \\\\");
    let _ = writeln!(script, "    --accept-server-license-terms \\\\");
    let _ = writeln!(script, "    --host 0.0.0.0 \\\\");
    let _ = writeln!(script, "    --port 8000 \\\\");
    let _ = writeln!(script, "    --connection-token \\\"\\$TOKEN\\\" \\\\");
    let _ = writeln!(script, "    --server-base-path '{}' \\\\", params.instance_path);
    let _ = writeln!(script, "    --extensions-dir \"$DATA_DIR/extensions\"");
    let _ = writeln!(script, "\"");

    script
}

const EXTENSION_INSTALLER_FN: &str = r#"install_extension_from_marketplace() {
    local extension=$1
    local publisher=$(echo "$extension" | cut -d. -f1)
    local name=$(echo "$extension" | cut -d. -f2)
    local temp_dir=$(mktemp -d)
    local vsix_file="$temp_dir/${extension}.vsix"
    local market_url="https://${publisher}.gallery.vsassets.io/_apis/public/gallery/publisher/${publisher}/extension/${name}/latest/assetbyname/Microsoft.VisualStudio.Services.VSIXPackage"

    if curl -L -f -H "Accept-Encoding: gzip" -o "$vsix_file" "$market_url" 2>/dev/null; then
        if file "$vsix_file" | grep -q "gzip compressed data"; then
            mv "$vsix_file" "$vsix_file.gz"
            gunzip "$vsix_file.gz" || true
        fi
        if file "$vsix_file" | grep -q -E "(Zip archive data|ZIP archive data|Java archive data)"; then
            local ext_dir="$DATA_DIR/extensions/${publisher}.${name}"
            rm -rf "$ext_dir"
            mkdir -p "$ext_dir"
            if unzip -q -o "$vsix_file" -d "$ext_dir" 2>/dev/null; then
                if [ -f "$ext_dir/extension/package.json" ]; then
                    mv "$ext_dir/extension/"* "$ext_dir/" 2>/dev/null || true
                    rmdir "$ext_dir/extension" 2>/dev/null || true
                fi
                chown -R vscode:vscode "$ext_dir"
            else
                echo "  failed to extract $extension"
            fi
        else
            echo "  $extension is not a valid VSIX/ZIP file"
        fi
    else
        echo "  failed to download $extension"
    fi
    rm -rf "$temp_dir"
}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_dispatches_architecture_and_execs_serve_web() {
        let params = LaunchScriptParams {
            instance_path: "/instances/alice-abc12345",
            vscode_version: "1.97.2",
            extensions: &[],
            settings: &json!({}),
            post_create_command: None,
        };
        let script = render_launch_script(&params);
        assert!(script.contains("cli-linux-x64"));
        assert!(script.contains("cli-linux-arm64"));
        assert!(script.contains("code serve-web") || script.contains("code' serve-web"));
        assert!(script.contains("--server-base-path '/instances/alice-abc12345'"));
    }

    #[test]
    fn script_embeds_requested_extensions() {
        let params = LaunchScriptParams {
            instance_path: "/instances/alice-abc12345",
            vscode_version: "1.97.2",
            extensions: &["rust-lang.rust-analyzer".to_string()],
            settings: &json!({}),
            post_create_command: None,
        };
        let script = render_launch_script(&params);
        assert!(script.contains("install_extension_from_marketplace 'rust-lang.rust-analyzer'"));
    }

    #[test]
    fn script_applies_settings_when_present() {
        let params = LaunchScriptParams {
            instance_path: "/instances/alice-abc12345",
            vscode_version: "1.97.2",
            extensions: &[],
            settings: &json!({"editor.fontSize": 14}),
            post_create_command: Some("npm install"),
        };
        let script = render_launch_script(&params);
        assert!(script.contains("data/Machine/settings.json"));
        assert!(script.contains("npm install"));
    }
}
