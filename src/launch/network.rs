//! Bridge networking over rtnetlink.
//!
//! A container launched with a device gets its own bridge:
//!
//! 1. `RTM_NEWLINK` kind `bridge` named `gk{8 hex}`
//! 2. the host device is enslaved to the bridge
//! 3. the bridge is brought up
//!
//! If anything after step 1 fails, including looking the new bridge up,
//! the bridge is removed again, so a failed attach leaves nothing behind. [`delete_bridge`] undoes a successful attach.

use futures::stream::TryStreamExt;
use rtnetlink::{Handle, new_connection};
use tracing::{debug, warn};

fn connect() -> Result<Handle, String> {
    let (connection, handle, _) =
        new_connection().map_err(|e| format!("unable to open netlink socket: {}", e))?;
    tokio::spawn(connection);
    Ok(handle)
}

async fn link_index(handle: &Handle, name: &str) -> Result<u32, String> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    let link = links
        .try_next()
        .await
        .map_err(|e| format!("unable to look up {}: {}", name, e))?
        .ok_or_else(|| format!("interface {} not found", name))?;
    Ok(link.header.index)
}

/// Creates `bridge`, attaches `device` to it and brings it up.
pub async fn attach(bridge: &str, device: &str) -> Result<(), String> {
    let handle = connect()?;
    let device_index = link_index(&handle, device).await?;

    handle
        .link()
        .add()
        .bridge(bridge.to_string())
        .execute()
        .await
        .map_err(|e| format!("unable to create bridge: {}", e))?;

    let configure = async {
        let bridge_index = link_index(&handle, bridge).await?;
        debug!("Created bridge {} (index {})", bridge, bridge_index);
        handle
            .link()
            .set(device_index)
            .controller(bridge_index)
            .execute()
            .await
            .map_err(|e| format!("unable to enslave {}: {}", device, e))?;
        handle
            .link()
            .set(bridge_index)
            .up()
            .execute()
            .await
            .map_err(|e| format!("unable to bring up bridge: {}", e))
    };
    configure_or_remove(bridge, configure, delete_bridge(bridge)).await?;

    debug!("Attached {} to bridge {}", device, bridge);
    Ok(())
}

/// Runs `configure` on a freshly created bridge and runs `remove` if it
/// fails. The configure error is returned even when removal fails too.
async fn configure_or_remove<T>(
    bridge: &str,
    configure: impl Future<Output = Result<T, String>>,
    remove: impl Future<Output = Result<(), String>>,
) -> Result<T, String> {
    match configure.await {
        Ok(value) => Ok(value),
        Err(reason) => {
            if let Err(e) = remove.await {
                warn!("Failed to remove half-configured bridge {}: {}", bridge, e);
            }
            Err(reason)
        }
    }
}

/// Deletes `bridge`. Enslaved devices are released by the kernel.
pub async fn delete_bridge(bridge: &str) -> Result<(), String> {
    let handle = connect()?;
    let index = link_index(&handle, bridge).await?;
    handle
        .link()
        .del(index)
        .execute()
        .await
        .map_err(|e| format!("unable to delete bridge: {}", e))?;
    debug!("Deleted bridge {}", bridge);
    Ok(())
}
