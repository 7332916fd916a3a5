// ── Provisioning command assembly ──

use crate::model::{DeviceAggregate, DeviceConfiguration};

/// Commands every managed device gets, ahead of anything configured.
const BASE_COMMANDS: [&str; 7] = [
    "Prefix1 1",
    "Prefix2 1",
    "Prefix3 1",
    "StateText1 OFF",
    "StateText2 ON",
    "StateText3 TOGGLE",
    "StateText4 HOLD",
];

/// Topic the device must move to, if its configuration asks for a
/// non-blank one that differs from the current topic.
pub fn topic_change(aggregate: &DeviceAggregate) -> Option<&str> {
    aggregate
        .configuration
        .as_ref()
        .and_then(DeviceConfiguration::desired_topic)
        .filter(|topic| *topic != aggregate.device.topic_name)
}

/// Build the `;`-joined backlog that brings a device in line with its
/// configuration, the fleet-wide `common` configuration and its template.
pub fn provisioning_commands(
    aggregate: &DeviceAggregate,
    common: Option<&DeviceConfiguration>,
) -> String {
    let mut commands: Vec<String> = BASE_COMMANDS.iter().map(|c| (*c).to_owned()).collect();

    if let Some(topic) = topic_change(aggregate) {
        commands.push(format!("Topic {topic}"));
        commands.push("Delay 20".to_owned());
    }

    if let Some(configuration) = &aggregate.configuration {
        if let Some(names) = &configuration.friendly_names {
            // Numbered over the non-blank names only.
            let names = names
                .iter()
                .map(String::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty());
            for (n, name) in (1..).zip(names) {
                commands.push(format!("FriendlyName{n} {name}"));
            }
        }
        commands.extend(
            configuration
                .setup_command_list()
                .into_iter()
                .map(str::to_owned),
        );
    }

    if let Some(common) = common {
        commands.extend(common.setup_command_list().into_iter().map(str::to_owned));
    }

    if let Some(template) = aggregate.template.as_ref().filter(|t| t.has_definition()) {
        commands.push(format!("Template {}", template.definition.trim()));
        commands.push("Module 0".to_owned());
    }

    commands.join(";")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{Device, MacAddress, Template};

    const BASE: &str = "Prefix1 1;Prefix2 1;Prefix3 1;StateText1 OFF;StateText2 ON;StateText3 TOGGLE;StateText4 HOLD";

    fn aggregate(
        configuration: Option<DeviceConfiguration>,
        template: Option<Template>,
    ) -> DeviceAggregate {
        let mut device = Device::new(MacAddress::new("aa:bb:cc:dd:ee:ff"));
        device.topic_name = "tasmota_DDEEFF".into();
        DeviceAggregate {
            device,
            configuration,
            template,
        }
    }

    #[test]
    fn bare_device_gets_base_commands() {
        assert_eq!(provisioning_commands(&aggregate(None, None), None), BASE);
    }

    #[test]
    fn full_configuration_in_order() {
        let mut cfg = DeviceConfiguration::new("aa:bb:cc:dd:ee:ff");
        cfg.topic_name = Some("kitchen".into());
        cfg.friendly_names = Some(vec!["Lamp".into(), " ".into(), "Fan".into()]);
        cfg.setup_commands = Some("PowerOnState 0; ;LedState 1".into());
        let mut common = DeviceConfiguration::new("common");
        common.setup_commands = Some("SetOption1 1".into());
        let template = Template {
            id: "Sonoff".into(),
            definition: r#"{"NAME":"Sonoff","GPIO":[17,255],"FLAG":0,"BASE":18}"#.into(),
            ..Template::default()
        };

        let commands = provisioning_commands(&aggregate(Some(cfg), Some(template)), Some(&common));
        assert_eq!(
            commands,
            format!(
                "{BASE};Topic kitchen;Delay 20;FriendlyName1 Lamp;FriendlyName2 Fan;PowerOnState 0;LedState 1;SetOption1 1;Template {};Module 0",
                r#"{"NAME":"Sonoff","GPIO":[17,255],"FLAG":0,"BASE":18}"#
            )
        );
    }

    #[test]
    fn unchanged_or_blank_topic_is_skipped() {
        let mut same = DeviceConfiguration::new("aa:bb:cc:dd:ee:ff");
        same.topic_name = Some("tasmota_DDEEFF".into());
        assert!(topic_change(&aggregate(Some(same), None)).is_none());

        let mut blank = DeviceConfiguration::new("aa:bb:cc:dd:ee:ff");
        blank.topic_name = Some("  ".into());
        let agg = aggregate(Some(blank), None);
        assert!(topic_change(&agg).is_none());
        assert_eq!(provisioning_commands(&agg, None), BASE);
    }

    #[test]
    fn blank_names_do_not_consume_numbers() {
        let mut cfg = DeviceConfiguration::new("aa:bb:cc:dd:ee:ff");
        cfg.friendly_names = Some(vec![String::new(), "B".into()]);
        assert_eq!(
            provisioning_commands(&aggregate(Some(cfg), None), None),
            format!("{BASE};FriendlyName1 B")
        );
    }

    #[test]
    fn template_without_definition_is_skipped() {
        let agg = aggregate(None, Some(Template::generic()));
        assert!(!provisioning_commands(&agg, None).contains("Module 0"));
    }
}
