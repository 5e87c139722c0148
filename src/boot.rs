//! Mount sequence run on the worker before it starts serving the host.

use conquer_once::spin::OnceCell;
use ide::consts::SECTOR_WORDS;
use ide::{plan_mount, Controller, IdeError, IdePort, IdeResult, IdentifyData, MountPlan, Platform};

use crate::config::StoredConfig;

/// Reset and identify the drive, publish the geometry chosen in `stored`
/// and mark the unit mounted. Proxies called here run inline on the
/// worker. On failure the unit stays unmounted with whatever geometry
/// [`StoredConfig::apply`] left behind.
pub fn auto_mount<B: IdePort + Send, P: Platform>(
    controller: &Controller<B, P>,
    stored: &StoredConfig,
) -> IdeResult<MountPlan> {
    let config = *controller.config();

    controller.reset_drive()?;
    if !controller.wait_until_drive_ready(config.mount_ready_timeout_ms)? {
        log::warn!("boot: no drive ready after {} ms", config.mount_ready_timeout_ms);
        return Err(IdeError::Timeout);
    }

    controller.identify()?;
    let mut words = [0u16; SECTOR_WORDS];
    controller.get_identify_data(&mut words)?;
    let id = IdentifyData::new(words);

    let plan = plan_mount(&id, stored.geometry, stored.manual_geometry());
    controller.set_chs_geometry(plan.cylinders, plan.heads, plan.sectors_per_track);
    controller.set_total_lba(plan.total_lba);
    controller.set_supports_lba48(plan.supports_lba48);
    controller.set_lba_mode(plan.use_lba_mode);

    if !plan.use_lba_mode {
        if plan.programmable() {
            if let Err(e) = controller.set_geometry(plan.heads, plan.sectors_per_track) {
                // The native translation is still in effect; keep going.
                log::warn!("boot: SET GEOMETRY failed: {}", e.description());
            }
        } else {
            log::warn!(
                "boot: {} heads / {} spt cannot be programmed",
                plan.heads,
                plan.sectors_per_track
            );
        }
    }

    controller.set_mounted(true);
    controller.notify_media_changed();
    log::info!(
        "boot: mounted '{}' {}/{}/{} lba={} lba48={} total={}",
        id.model().as_str(),
        plan.cylinders,
        plan.heads,
        plan.sectors_per_track,
        plan.use_lba_mode,
        plan.supports_lba48,
        plan.total_lba
    );
    Ok(plan)
}

/// Worker startup hook: apply stored settings, then mount if asked to.
pub fn startup<B: IdePort + Send, P: Platform>(controller: &Controller<B, P>, stored: &StoredConfig) {
    stored.apply(controller);
    if stored.auto_mount {
        if let Err(e) = auto_mount(controller, stored) {
            log::error!("boot: auto-mount failed: {}", e.description());
        }
    }
}

/// Fill a boot-time global. A second fill is refused with `NotReady`.
pub fn publish<T>(cell: &OnceCell<T>, value: T, what: &str) -> IdeResult<()> {
    cell.try_init_once(|| value).map_err(|_| {
        log::error!("boot: {} already initialized", what);
        IdeError::NotReady
    })
}
