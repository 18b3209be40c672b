// src/core/compose/mod.rs

//! Rewrites a template's `docker-compose.yml` into a cluster-specific
//! instance by substituting ports, names, and volume paths (spec §4.C).
//! Pure text transformation: no filesystem or driver access happens here.

use crate::core::errors::ControlPlaneError;
use crate::core::model::ResourceLimits;
use once_cell::sync::Lazy;
use regex::Regex;

static PORT_MAPPING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^(\s*-\s*")(\d+)(:\d+"?\s*)$"#).unwrap());
static CONTAINER_NAME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\s*container_name:\s*)(.+)$").unwrap());
static VOLUME_HOST_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^(\s*-\s*")(\./[^:"]+)(:[^"]+"?\s*)$"#).unwrap());

/// Capability granted for egress traffic shaping (`tc`) inside the
/// container, since the default Docker capability set drops `NET_ADMIN`.
const NETWORK_SHAPING_CAP: &str = "NET_ADMIN";

/// Inputs needed to rewrite a template compose file into one cluster's
/// instance (spec §4.C).
pub struct ComposeParams<'a> {
    pub container_name: &'a str,
    pub host_port: u16,
    pub host_root: &'a str,
    pub limits: ResourceLimits,
}

/// Rewrites `template_yaml`, replacing the first host-side port mapping
/// with `host_port`, every `container_name:` line with `container_name`,
/// every relative `./...` volume source with an absolute path rooted at
/// `host_root`, and inserting the cluster's resource limits as CPU/memory
/// directives, a network-shaping capability grant, a restart policy, a
/// disk-limit-sized tmpfs mount, and a cluster-specific environment block
/// (spec §4.C). Fails with [`ControlPlaneError::ComposeSpec`] when no
/// port-mapping anchor is found, since a compose file with no published
/// port cannot host this cluster's application port.
pub fn synthesize(template_yaml: &str, params: &ComposeParams<'_>) -> Result<String, ControlPlaneError> {
    if !PORT_MAPPING_LINE.is_match(template_yaml) {
        return Err(ControlPlaneError::ComposeSpec(
            "template compose file has no host port mapping anchor".to_string(),
        ));
    }
    if !CONTAINER_NAME_LINE.is_match(template_yaml) {
        return Err(ControlPlaneError::ComposeSpec(
            "template compose file has no container_name anchor".to_string(),
        ));
    }

    let mut replaced_port = false;
    let with_port = PORT_MAPPING_LINE.replace(template_yaml, |caps: &regex::Captures| {
        if replaced_port {
            return caps[0].to_string();
        }
        replaced_port = true;
        format!("{}{}{}", &caps[1], params.host_port, &caps[3])
    });

    let with_name = CONTAINER_NAME_LINE.replace(&with_port, |caps: &regex::Captures| {
        let indent = &caps[1];
        let name = prefixed_container_name(&caps[2], params.container_name);
        let rewritten = format!("{}{}", indent, name);
        format!("{}\n{}", rewritten, limits_block(indent, params))
    });

    let with_volumes = VOLUME_HOST_PATH.replace_all(&with_name, |caps: &regex::Captures| {
        let rel = caps[2].trim_start_matches("./");
        format!("{}{}/{}{}", &caps[1], params.host_root, rel, &caps[3])
    });

    Ok(with_volumes.into_owned())
}

/// Preserves the template's own `container_name:` value as a prefix on the
/// generated cluster container name (spec §4.C, §4.A: templates may
/// prefix/suffix the real container name, so `resolve-id` must tolerate a
/// name that only *contains* the sanitized cluster name rather than
/// matching it exactly). A generic placeholder value contributes no
/// prefix.
fn prefixed_container_name(template_value: &str, cluster_name: &str) -> String {
    let prefix = crate::core::model::sanitize_name(template_value.trim());
    if prefix.is_empty() || prefix == "placeholder" {
        cluster_name.to_string()
    } else {
        format!("{prefix}_{cluster_name}")
    }
}

/// Builds the block of compose directives injected right after the
/// rewritten `container_name:` line, indented to match it (spec §4.C:
/// CPU/memory limits, memory reservation, network-shaping capability,
/// restart policy, disk-sized tmpfs, and cluster-specific environment).
fn limits_block(indent: &str, params: &ComposeParams<'_>) -> String {
    let memory_mb = params.limits.memory_mib;
    let reservation_mb = (memory_mb / 2).max(1);
    format!(
        "{indent}cpus: \"{cpu}\"\n\
         {indent}mem_limit: {mem}m\n\
         {indent}mem_reservation: {res}m\n\
         {indent}cap_add:\n\
         {indent}  - {cap}\n\
         {indent}restart: unless-stopped\n\
         {indent}tmpfs:\n\
         {indent}  - /tmp:size={disk}g\n\
         {indent}environment:\n\
         {indent}  - CLUSTER_PORT={port}\n\
         {indent}  - CLUSTER_MEMORY_MIB={mem}\n\
         {indent}  - CLUSTER_CPU_CORES={cpu}",
        indent = indent,
        cpu = params.limits.cpu_cores,
        mem = memory_mb,
        res = reservation_mb,
        cap = NETWORK_SHAPING_CAP,
        disk = params.limits.disk_gib,
        port = params.host_port,
    )
}

/// Inputs needed to synthesize an FTP sidecar's standalone compose file
/// (spec §4.F: "run the FTP image with the configured image, generated
/// credentials, and the resolved PASV port window").
pub struct FtpComposeParams<'a> {
    pub container_name: &'a str,
    pub image: &'a str,
    pub host_root: &'a str,
    pub ftp_port: u16,
    pub pasv_min: u16,
    pub pasv_max: u16,
    pub username: &'a str,
    pub password: &'a str,
}

/// Builds a standalone `docker-compose.yml` for one cluster's FTP sidecar:
/// the configured image, control port, full passive-mode port range, and
/// generated credentials (spec §4.F). Unlike [`synthesize`] this has no
/// template to rewrite, so there is nothing to fail on.
pub fn synthesize_ftp(params: &FtpComposeParams<'_>) -> String {
    format!(
        "services:\n\
         \x20 ftp:\n\
         \x20   image: \"{image}\"\n\
         \x20   container_name: \"{container_name}\"\n\
         \x20   restart: unless-stopped\n\
         \x20   ports:\n\
         \x20     - \"{ftp_port}:21\"\n\
         \x20     - \"{pasv_min}-{pasv_max}:{pasv_min}-{pasv_max}\"\n\
         \x20   environment:\n\
         \x20     - FTP_USER={username}\n\
         \x20     - FTP_PASS={password}\n\
         \x20     - PASV_ADDRESS=0.0.0.0\n\
         \x20     - PASV_MIN_PORT={pasv_min}\n\
         \x20     - PASV_MAX_PORT={pasv_max}\n\
         \x20   volumes:\n\
         \x20     - \"{host_root}:/home/vsftpd/{username}\"\n",
        image = params.image,
        container_name = params.container_name,
        ftp_port = params.ftp_port,
        pasv_min = params.pasv_min,
        pasv_max = params.pasv_max,
        username = params.username,
        password = params.password,
        host_root = params.host_root,
    )
}
